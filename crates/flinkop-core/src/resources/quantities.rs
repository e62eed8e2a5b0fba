use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Resource quantities for a container's limits or requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceQuantities {
    /// Parse CPU string (e.g., "2", "1000m", "0.5")
    pub fn parse_cpu(s: &str) -> Result<i64, String> {
        if let Some(m) = s.strip_suffix('m') {
            // Millicores
            m.parse::<i64>()
                .map_err(|e| format!("Invalid CPU millicore value: {}", e))
        } else if let Ok(cores) = s.parse::<f64>() {
            // Cores as float
            Ok((cores * 1000.0).round() as i64)
        } else {
            Err(format!("Invalid CPU format: {}", s))
        }
    }

    /// Parse memory string (e.g., "128Mi", "1Gi", "1G", "1024")
    pub fn parse_memory(s: &str) -> Result<i64, String> {
        const SUFFIXES: [(&str, f64); 7] = [
            ("Ki", 1024.0),
            ("Mi", 1024.0 * 1024.0),
            ("Gi", 1024.0 * 1024.0 * 1024.0),
            ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
            ("k", 1e3),
            ("M", 1e6),
            ("G", 1e9),
        ];

        for (suffix, factor) in SUFFIXES {
            if let Some(num) = s.strip_suffix(suffix) {
                let value = num.parse::<f64>().map_err(|e| e.to_string())?;
                return Ok((value * factor).round() as i64);
            }
        }

        // Plain bytes
        s.parse::<i64>().map_err(|e| e.to_string())
    }

    /// Get CPU and memory from a resource map (k8s-openapi format)
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let cpu_millicores = resources
            .get("cpu")
            .and_then(|q| Self::parse_cpu(&q.0).ok())
            .unwrap_or(0);

        let memory_bytes = resources
            .get("memory")
            .and_then(|q| Self::parse_memory(&q.0).ok())
            .unwrap_or(0);

        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Compare two resource maps the way the API server does.
    ///
    /// The API server normalizes quantities ("1000m" is stored as "1"), so cpu
    /// and memory are compared numerically. Other resources compare verbatim.
    pub fn maps_equivalent(
        a: Option<&BTreeMap<String, Quantity>>,
        b: Option<&BTreeMap<String, Quantity>>,
    ) -> bool {
        let empty = BTreeMap::new();
        let a = a.unwrap_or(&empty);
        let b = b.unwrap_or(&empty);

        if a.keys().ne(b.keys()) {
            return false;
        }

        if Self::from_k8s_resource_map(a) != Self::from_k8s_resource_map(b) {
            return false;
        }

        a.iter()
            .filter(|(k, _)| k.as_str() != "cpu" && k.as_str() != "memory")
            .all(|(k, v)| b.get(k) == Some(v))
    }
}
