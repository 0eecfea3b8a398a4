//! Validation configuration, read once from the environment at startup.
//!
//! Every instance of the hosted computation exports the same
//! `CROSS_VALIDATION_*` variables except for its own instance id. Instance 0
//! binds the coordinator endpoint; everyone (instance 0 included) dials it.

use tracing::warn;

use crate::error::Error;
use crate::transport::Endpoint;

/// Upper bound on the participant count. The rendezvous is a handful of
/// replicas, not a cluster.
pub const MAX_INSTANCES: usize = 4;

pub const ENV_INSTANCE_ID: &str = "CROSS_VALIDATION_INSTANCE_ID";
pub const ENV_NUM_INSTANCES: &str = "CROSS_VALIDATION_NUM_INSTANCES";
pub const ENV_SERVER_ADDR: &str = "CROSS_VALIDATION_SERVER_ADDR";
pub const ENV_SERVER_PORT: &str = "CROSS_VALIDATION_SERVER_PORT";

const DEFAULT_ADDR: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

/// Configuration for one validation participant.
#[derive(Debug, Clone)]
pub struct Config {
    /// This instance's id in `[0, num_instances)`. Id 0 hosts the coordinator.
    pub instance_id: i32,
    /// Total participant count.
    pub num_instances: usize,
    /// Coordinator endpoint, shared by all instances.
    pub endpoint: Endpoint,
    /// Abort the process when a sync point mismatches. On by default; test
    /// harnesses turn it off to observe mismatch rounds in-process.
    pub assert_on_mismatch: bool,
}

impl Config {
    /// Build a validated configuration.
    pub fn new(instance_id: i32, num_instances: usize, endpoint: Endpoint) -> Result<Self, Error> {
        if num_instances == 0 || num_instances > MAX_INSTANCES {
            return Err(Error::InstanceCount {
                got: num_instances,
                max: MAX_INSTANCES,
            });
        }
        if instance_id < 0 || instance_id as usize >= num_instances {
            return Err(Error::InstanceId {
                id: instance_id,
                num_instances,
            });
        }
        Ok(Self {
            instance_id,
            num_instances,
            endpoint,
            assert_on_mismatch: true,
        })
    }

    /// Read the full configuration from `CROSS_VALIDATION_*` variables.
    ///
    /// Instance id and count are required; address and port fall back to
    /// `0.0.0.0:5000`.
    pub fn from_env() -> Result<Self, Error> {
        let instance_id: i32 = env_parse(ENV_INSTANCE_ID)?;
        let num_instances: usize = env_parse(ENV_NUM_INSTANCES)?;
        Self::new(instance_id, num_instances, endpoint_from_env()?)
    }
}

/// Read just the coordinator endpoint from the environment.
///
/// `CROSS_VALIDATION_SERVER_ADDR` accepts a TCP host (`10.0.0.7`), a
/// `unix:/path` form, or a bare absolute path; `CROSS_VALIDATION_SERVER_PORT`
/// applies to the TCP form only. A malformed port falls back to the default,
/// as the original tooling tolerated.
pub fn endpoint_from_env() -> Result<Endpoint, Error> {
    let addr = std::env::var(ENV_SERVER_ADDR)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let port = match std::env::var(ENV_SERVER_PORT) {
        Ok(raw) if !raw.is_empty() => match raw.trim().parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                warn!(raw = %raw, default = DEFAULT_PORT, "malformed coordinator port, using default");
                DEFAULT_PORT
            }
        },
        _ => DEFAULT_PORT,
    };
    Endpoint::parse(&addr, port)
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<T, Error> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or(Error::Env(var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_enforced() {
        let ep = Endpoint::parse("127.0.0.1", 5000).unwrap();
        assert!(Config::new(0, 1, ep.clone()).is_ok());
        assert!(Config::new(3, MAX_INSTANCES, ep.clone()).is_ok());
        assert!(matches!(
            Config::new(0, MAX_INSTANCES + 1, ep.clone()),
            Err(Error::InstanceCount { .. })
        ));
        assert!(matches!(
            Config::new(0, 0, ep.clone()),
            Err(Error::InstanceCount { .. })
        ));
        assert!(matches!(
            Config::new(2, 2, ep.clone()),
            Err(Error::InstanceId { .. })
        ));
        assert!(matches!(Config::new(-1, 2, ep), Err(Error::InstanceId { .. })));
    }

    #[test]
    fn asserts_by_default() {
        let ep = Endpoint::parse("127.0.0.1", 5000).unwrap();
        assert!(Config::new(0, 2, ep).unwrap().assert_on_mismatch);
    }

    // Environment-driven parsing lives in one test: the process environment
    // is shared across the parallel test runner.
    #[test]
    fn from_env_reads_all_variables() {
        std::env::set_var(ENV_INSTANCE_ID, "1");
        std::env::set_var(ENV_NUM_INSTANCES, "2");
        std::env::set_var(ENV_SERVER_ADDR, "10.1.2.3");
        std::env::set_var(ENV_SERVER_PORT, "6100");
        let config = Config::from_env().unwrap();
        assert_eq!(config.instance_id, 1);
        assert_eq!(config.num_instances, 2);
        assert_eq!(config.endpoint, Endpoint::parse("10.1.2.3", 6100).unwrap());

        // Malformed port falls back to the default rather than failing init.
        std::env::set_var(ENV_SERVER_PORT, "not-a-port");
        let config = Config::from_env().unwrap();
        assert_eq!(config.endpoint, Endpoint::parse("10.1.2.3", 5000).unwrap());

        // Unix form ignores the port entirely.
        std::env::set_var(ENV_SERVER_ADDR, "unix:/tmp/lockstep-test.sock");
        std::env::set_var(ENV_SERVER_PORT, "6100");
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.endpoint,
            Endpoint::parse("/tmp/lockstep-test.sock", 0).unwrap()
        );

        // Missing id or count is a hard configuration error.
        std::env::remove_var(ENV_INSTANCE_ID);
        assert!(matches!(Config::from_env(), Err(Error::Env(ENV_INSTANCE_ID))));
        std::env::set_var(ENV_INSTANCE_ID, "0");
        std::env::remove_var(ENV_NUM_INSTANCES);
        assert!(matches!(
            Config::from_env(),
            Err(Error::Env(ENV_NUM_INSTANCES))
        ));

        std::env::remove_var(ENV_SERVER_ADDR);
        std::env::remove_var(ENV_SERVER_PORT);
    }
}
