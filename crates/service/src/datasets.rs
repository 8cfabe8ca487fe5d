//! Built-in employee datasets.
//!
//! Each preset pairs a table name and column layout with the id, flag,
//! delete and update policies its endpoint uses.

use crate::row_store::schema::{
    ActiveFlag, DeleteMode, IdStrategy, RowStoreSpec, SchemaDriftPolicy, TableSchema, UpdateLocator,
};

pub const CHERAN_PLASTICS: &str = "cheran_plastics";
pub const COMPANY_CONTRACT_EMPLOYEES: &str = "company_contract_employees";
pub const CONTRACT_EMPLOYEES: &str = "contract_employees";
pub const EMPLOYEES_UNIT1: &str = "employees_unit1";
pub const EMPLOYEES_UNIT2: &str = "employees_unit2";

pub const PRESET_NAMES: [&str; 5] = [
    CHERAN_PLASTICS,
    COMPANY_CONTRACT_EMPLOYEES,
    CONTRACT_EMPLOYEES,
    EMPLOYEES_UNIT1,
    EMPLOYEES_UNIT2,
];

const IS_ACTIVE: &str = "Is Active";
const START_ID: u64 = 1000;

const CHERAN_COLUMNS: &[&str] = &[
    "ID", "Full Name", "Gender", "Marital Status", "Spouse Name", "Date of Birth",
    "Blood Group", "Father Name", "Mother Name", "Mobile Number", "Emergency Contact",
    "Apartment No", "Street Name", "City", "State", "Pincode",
    "Aadhar Number", "PAN Number", "Voter ID/Driving License", "ESI Number",
    "PF UAN Number", "Date of Joining",
    "Bank Name", "Account Number", "IFSC Code", "Branch",
    "Aadhar Front", "Aadhar Back", "PAN Card", "Employee Photo",
    IS_ACTIVE,
];

const COMPANY_CONTRACT_COLUMNS: &[&str] = &[
    "ID", "Department", "Designation", "Full Name", "Gender",
    "Marital Status", "Spouse Name", "Date of Birth", "Blood Group",
    "Father Name", "Mother Name", "Mobile Number", "Emergency Contact",
    "Apartment No", "Street Name", "City", "State", "Pincode",
    "Aadhar Number", "PAN Number", "Voter ID/Driving License", "ESI Number",
    "PF UAN Number", "Date of Joining", "Bank Name", "Account Number",
    "IFSC Code", "Branch", "Aadhar Front", "Aadhar Back", "PAN Card",
    "Employee Photo", IS_ACTIVE,
];

const CONTRACT_COLUMNS: &[&str] = &[
    "ID", "Consultancy Name", "Full Name", "Gender", "Marital Status", "Spouse Name",
    "Date of Birth", "Blood Group", "Father Name", "Mother Name",
    "Mobile Number", "Emergency Contact", "Door No", "Street Name", "Pincode",
    "Taluk", "District", "State", "Aadhar Number", "PAN Number",
    "Date of Joining", "Department", "Designation",
    "Aadhar Front", "Aadhar Back", "PAN Card", "Employee Photo",
    "Timestamp", IS_ACTIVE,
];

const UNIT_COLUMNS: &[&str] = &[
    "ID", "Full Name", "Gender", "Marital Status", "Spouse Name", "Date of Birth",
    "Blood Group", "Father Name", "Mother Name", "Mobile Number", "Emergency Contact",
    "Apartment No", "Street Name", "City", "State", "Pincode",
    "Aadhar Number", "PAN Number", "Voter ID/Driving License", "ESI Number",
    "PF UAN Number", "Date of Joining", "Department", "Designation",
    "Bank Name", "Account Number", "IFSC Code", "Branch",
    "Aadhar Front", "Aadhar Back", "PAN Card", "Employee Photo",
    IS_ACTIVE,
];

/// 外包公司名称 → ID 前缀
pub const CONSULTANCY_CODES: &[(&str, &str)] = &[
    ("Asma Man Power Service", "ASM"),
    ("Nila Agency", "NIL"),
    ("GKS Associates", "GKS"),
    ("Mukesh Group", "MUK"),
    ("Anand Group", "ANA"),
    ("Sunil 2 Group", "SUN"),
    ("Mohan Man Power Contract", "MOH"),
];

/// A dataset served by one endpoint.
#[derive(Clone, Debug)]
pub struct Dataset {
    /// Route segment and log/metric label
    pub name: String,
    pub table: String,
    /// Query parameter carrying the CRUD verb on POST
    pub verb_param: String,
    pub spec: RowStoreSpec,
}

impl Dataset {
    pub fn preset(name: &str) -> Option<Self> {
        let (table, columns, id_strategy, verb_param) = match name {
            CHERAN_PLASTICS => ("cheran_plastics", CHERAN_COLUMNS, numeric(), "method"),
            COMPANY_CONTRACT_EMPLOYEES => (
                "company_contract_employees",
                COMPANY_CONTRACT_COLUMNS,
                IdStrategy::Prefixed { prefix: "CC".into(), width: 4 },
                "method",
            ),
            CONTRACT_EMPLOYEES => (
                "contract_employees_1",
                CONTRACT_COLUMNS,
                IdStrategy::PrefixByColumn {
                    column: "Consultancy Name".into(),
                    codes: CONSULTANCY_CODES.iter().map(|(n, c)| (n.to_string(), c.to_string())).collect(),
                    fallback: "OTH".into(),
                    width: 4,
                },
                "method",
            ),
            EMPLOYEES_UNIT1 => ("Employees", UNIT_COLUMNS, numeric(), "method"),
            EMPLOYEES_UNIT2 => ("employees_unit2", UNIT_COLUMNS, numeric(), "action"),
            _ => return None,
        };

        let schema = TableSchema::new(columns.iter().copied()).ok()?;
        let mut active_flag = ActiveFlag::new(IS_ACTIVE);
        active_flag.render_as_bool = name == CHERAN_PLASTICS;
        active_flag.normalize_on_update = name == EMPLOYEES_UNIT1;
        active_flag.upper_case_on_read = name == EMPLOYEES_UNIT1;

        let spec = RowStoreSpec {
            schema,
            id_strategy,
            active_flag,
            delete_mode: if name == COMPANY_CONTRACT_EMPLOYEES { DeleteMode::Soft } else { DeleteMode::Hard },
            update_locator: if name == EMPLOYEES_UNIT1 { UpdateLocator::VerifiedPosition } else { UpdateLocator::ById },
            drift_policy: SchemaDriftPolicy::Reject,
            stamp_column: (name == CONTRACT_EMPLOYEES).then(|| "Timestamp".to_string()),
            expose_row_index: matches!(name, EMPLOYEES_UNIT1 | CONTRACT_EMPLOYEES),
        };

        Some(Self { name: name.to_string(), table: table.to_string(), verb_param: verb_param.to_string(), spec })
    }

    pub fn all() -> Vec<Self> {
        PRESET_NAMES.iter().filter_map(|n| Self::preset(n)).collect()
    }
}

fn numeric() -> IdStrategy { IdStrategy::Numeric { start: START_ID } }
