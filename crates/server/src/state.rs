use std::{collections::HashMap, sync::Arc};

use service::{storage::TabularBackend, Dataset, RowStore, StoreError};

/// One served dataset: its row store and the query parameter naming the verb.
pub struct DatasetEndpoint {
    pub store: RowStore,
    pub verb_param: String,
}

impl DatasetEndpoint {
    pub fn new(dataset: &Dataset, backend: Arc<dyn TabularBackend>) -> Result<Self, StoreError> {
        Ok(Self { store: RowStore::for_dataset(dataset, backend)?, verb_param: dataset.verb_param.clone() })
    }

    pub fn name(&self) -> &str { self.store.name() }
}

/// Shared router state, keyed by route segment.
#[derive(Clone, Default)]
pub struct AppState {
    endpoints: Arc<HashMap<String, Arc<DatasetEndpoint>>>,
}

impl AppState {
    pub fn new(endpoints: impl IntoIterator<Item = DatasetEndpoint>) -> Self {
        let map = endpoints.into_iter().map(|e| (e.name().to_string(), Arc::new(e))).collect();
        Self { endpoints: Arc::new(map) }
    }

    /// Every preset over one backend, routed by preset name.
    pub fn with_presets(backend: Arc<dyn TabularBackend>) -> Result<Self, StoreError> {
        let endpoints = Dataset::all()
            .iter()
            .map(|d| DatasetEndpoint::new(d, Arc::clone(&backend)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(endpoints))
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<DatasetEndpoint>> {
        self.endpoints.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
