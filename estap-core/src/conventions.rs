//! Names and ports fixed by the estap chart and the demo manifests.

/// Port the estap proxy listens on behind its load balancer.
pub const ESTAP_PORT: u16 = 8888;

/// Suffix appended to a release name to get the proxy deployment.
pub const DEPLOYMENT_SUFFIX: &str = "-estap";

/// Suffix appended to a release name to get the load-balancer service.
pub const LOAD_BALANCER_SUFFIX: &str = "-estap-lb";

/// Service type that provisions an externally reachable address.
pub const LOAD_BALANCER_TYPE: &str = "LoadBalancer";

/// Environment variables read from the database deployment, in the order
/// the demo manifest declares them.
pub const POSTGRES_USER: &str = "POSTGRES_USER";
pub const POSTGRES_DB: &str = "POSTGRES_DB";
pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";

/// libpq environment contract injected into the viewer deployment.
pub const PGHOST: &str = "PGHOST";
pub const PGPORT: &str = "PGPORT";
pub const PGUSER: &str = "PGUSER";
pub const PGPASSWORD: &str = "PGPASSWORD";
pub const PGDATABASE: &str = "PGDATABASE";
pub const PGPASSFILE: &str = "PGPASSFILE";

/// Deployment name of the proxy for a release.
pub fn deployment_name(release: &str) -> String {
    format!("{release}{DEPLOYMENT_SUFFIX}")
}

/// Conventional load-balancer service name for a release.
pub fn load_balancer_name(release: &str) -> String {
    format!("{release}{LOAD_BALANCER_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_names() {
        assert_eq!(deployment_name("bank-a"), "bank-a-estap");
        assert_eq!(load_balancer_name("bank-a"), "bank-a-estap-lb");
    }
}
