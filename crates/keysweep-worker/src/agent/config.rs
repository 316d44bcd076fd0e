use anyhow::bail;
use clap::Parser;
use keysweep_core::{types::DEFAULT_PORT, wire::MAX_CAPACITY};

/// Runtime configuration for the `keysweep-worker` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keysweep-worker",
    version,
    about = "Scans a share of a keysweep keyspace on behalf of a coordinator"
)]
pub struct CliArgs {
    /// Coordinator endpoint.
    ///
    /// Environment variable: `COORDINATOR_ADDR`
    #[arg(long, env = "COORDINATOR_ADDR", default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    pub coordinator_addr: String,

    /// Capacity to advertise, which is also the number of local scanners.
    /// Defaults to the number of logical CPUs.
    ///
    /// Environment variable: `CORES`
    #[arg(long, env = "CORES")]
    pub cores: Option<usize>,

    /// Verify the fingerprint oracle on known preimages before connecting.
    #[arg(long, default_value_t = false)]
    pub self_check: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub coordinator_addr: String,
    pub cores: usize,
}

impl WorkerConfig {
    pub fn new(coordinator_addr: impl Into<String>, cores: usize) -> anyhow::Result<Self> {
        if cores == 0 {
            bail!("CORES must be greater than 0");
        }
        if cores > MAX_CAPACITY {
            bail!("CORES must be at most {MAX_CAPACITY}, got {cores}");
        }
        Ok(Self {
            coordinator_addr: coordinator_addr.into(),
            cores,
        })
    }
}

impl TryFrom<CliArgs> for WorkerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let cores = args.cores.unwrap_or_else(num_cpus::get);
        Self::new(args.coordinator_addr, cores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_cpu_count() {
        let args = CliArgs::parse_from(["keysweep-worker"]);
        let config = WorkerConfig::try_from(args).unwrap();
        assert_eq!(config.cores, num_cpus::get());
        assert_eq!(config.coordinator_addr, "127.0.0.1:12345");
    }

    #[test]
    fn rejects_zero_cores() {
        let args = CliArgs::parse_from(["keysweep-worker", "--cores", "0"]);
        assert!(WorkerConfig::try_from(args).is_err());
    }

    #[test]
    fn rejects_cores_above_wire_limit() {
        assert!(WorkerConfig::new("127.0.0.1:1", MAX_CAPACITY).is_ok());
        assert!(WorkerConfig::new("127.0.0.1:1", MAX_CAPACITY + 1).is_err());
    }
}
