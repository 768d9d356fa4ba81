//! Instance discovery is an out-of-scope external collaborator: resolving a
//! claimed `instance_domain` to the canonical domain an instance actually
//! federates under. The local invite-resolve proxy depends on this to
//! defend against SSRF via a malicious discovery response — it must never
//! trust a caller-supplied domain directly for a second outbound call.

use async_trait::async_trait;

#[async_trait]
pub trait InstanceDiscovery: Send + Sync {
    /// Resolve `claimed_domain` to the canonical domain the instance actually
    /// federates under. Implementations should apply their own caching; the
    /// caller treats the result as untrusted input to the SSRF guard, not as
    /// proof of anything on its own.
    async fn resolve_canonical_domain(&self, claimed_domain: &str) -> Result<String, String>;
}

/// Minimal discovery: trusts the caller-supplied domain as its own canonical
/// form. Adequate for a single-hop deployment or for tests; a production
/// discovery collaborator would instead fetch the instance's self-asserted
/// identity document and compare.
#[derive(Debug, Default)]
pub struct TrivialInstanceDiscovery;

#[async_trait]
impl InstanceDiscovery for TrivialInstanceDiscovery {
    async fn resolve_canonical_domain(&self, claimed_domain: &str) -> Result<String, String> {
        Ok(claimed_domain.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trivial_discovery_echoes_input() {
        let discovery = TrivialInstanceDiscovery;
        let resolved = discovery
            .resolve_canonical_domain("attacker.example")
            .await
            .unwrap();
        assert_eq!(resolved, "attacker.example");
    }
}
