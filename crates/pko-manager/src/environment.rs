//! Cluster environment probing

use pko_core::environment::{OpenShiftEnvironment, ProxyEnvironment};
use pko_core::Environment;

use crate::error::{ManagerError, Result};

/// Describe the cluster the manager runs against.
pub async fn probe(client: &kube::Client, openshift_version: Option<String>) -> Result<Environment> {
    let info = client
        .apiserver_version()
        .await
        .map_err(ManagerError::Environment)?;

    let mut environment = Environment::kubernetes(info.git_version);
    environment.open_shift = openshift_version
        .filter(|v| !v.is_empty())
        .map(|version| OpenShiftEnvironment {
            version,
            ..Default::default()
        });
    environment.proxy = proxy_from(|name| std::env::var(name).ok());

    tracing::info!(
        kubernetes = %environment.kubernetes.version,
        openshift = ?environment.open_shift.as_ref().map(|o| &o.version),
        proxy = environment.proxy.is_some(),
        "probed environment"
    );
    Ok(environment)
}

/// Proxy settings of the manager process, upper case names win.
fn proxy_from(lookup: impl Fn(&str) -> Option<String>) -> Option<ProxyEnvironment> {
    let read = |name: &str| {
        lookup(name)
            .or_else(|| lookup(&name.to_lowercase()))
            .unwrap_or_default()
    };
    let proxy = ProxyEnvironment {
        http_proxy: read("HTTP_PROXY"),
        https_proxy: read("HTTPS_PROXY"),
        no_proxy: read("NO_PROXY"),
    };
    (proxy != ProxyEnvironment::default()).then_some(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_proxy_from_env() {
        let vars = HashMap::from([
            ("HTTPS_PROXY", "http://proxy:3128"),
            ("no_proxy", ".svc,.cluster.local"),
        ]);
        let proxy = proxy_from(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(proxy.http_proxy, "");
        assert_eq!(proxy.https_proxy, "http://proxy:3128");
        assert_eq!(proxy.no_proxy, ".svc,.cluster.local");
    }

    #[test]
    fn test_no_proxy_configured() {
        assert!(proxy_from(|_| None).is_none());
    }
}
