//! Utility functions for Ringmaster

use crate::error::{HaError, Result};

/// Name of this node as the cluster knows it
pub fn local_node_name() -> Result<String> {
    hostname::get()?
        .into_string()
        .map_err(|raw| HaError::configuration(format!("hostname is not valid UTF-8: {:?}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_node_name_not_empty() {
        let name = local_node_name().unwrap();
        assert!(!name.is_empty());
    }
}
