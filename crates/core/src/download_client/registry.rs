use std::sync::Arc;

use super::DownloadClient;

/// The set of download clients built at startup.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Vec<Arc<dyn DownloadClient>>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<Arc<dyn DownloadClient>>) -> Self {
        Self { clients }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DownloadClient>> {
        self.clients.iter().find(|c| c.name() == name).cloned()
    }

    pub fn all(&self) -> &[Arc<dyn DownloadClient>] {
        &self.clients
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The client grabs go to: the named one, or the first registered.
    pub fn select(&self, preferred: Option<&str>) -> Option<Arc<dyn DownloadClient>> {
        match preferred {
            Some(name) => self.get(name),
            None => self.clients.first().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDownloadClient;

    #[test]
    fn test_select_client() {
        let registry = ClientRegistry::new(vec![
            Arc::new(MockDownloadClient::new("first")),
            Arc::new(MockDownloadClient::new("second")),
        ]);

        assert_eq!(registry.select(None).unwrap().name(), "first");
        assert_eq!(registry.select(Some("second")).unwrap().name(), "second");
        assert!(registry.select(Some("missing")).is_none());
        assert!(ClientRegistry::default().select(None).is_none());
    }
}
