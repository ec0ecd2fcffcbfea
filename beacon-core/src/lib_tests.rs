//! Unit tests for the crate root

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::sync::Arc;

    #[test]
    fn test_error_config() {
        let error = ObservabilityError::Config("dedup.max_keys must be greater than zero".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: dedup.max_keys must be greater than zero"
        );

        let debug_str = format!("{error:?}");
        assert!(debug_str.contains("Config"));
    }

    #[test]
    fn test_error_runtime() {
        let error = ObservabilityError::Runtime("no reactor running".to_string());
        assert_eq!(error.to_string(), "Runtime error: no reactor running");
    }

    #[test]
    fn test_error_from_serde() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error = ObservabilityError::from(json_error);

        match error {
            ObservabilityError::Serialization(_) => {
                assert!(error.to_string().contains("Serialization error"));
            }
            _ => panic!("Expected Serialization error variant"),
        }
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(5));
        let poisoner = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(mutex.is_poisoned());
        *lock(&mutex) += 1;
        assert_eq!(*lock(&mutex), 6);
    }

    #[test]
    fn test_reexports_available() {
        let _config = ObservabilityConfig::default();
        let _sink = MemorySink::new();
        let _registry = InstanceRegistry::new();
        assert_eq!(Level::ALL.len(), 5);
        assert_eq!(CircuitState::Closed.to_string(), "Closed");
    }
}
