use anyhow::{anyhow, bail};
use clap::Parser;
use core::time::Duration;
use keysweep_core::{
    Md5Decimal, Oracle, SearchRange,
    types::{DEFAULT_PORT, MAX_KEYSPACE_DIGITS},
};

/// Runtime configuration for the `keysweep-coordinator` binary.
///
/// The session parameters (target, keyspace, participant count) are fixed for
/// the lifetime of the process; there is no persisted state between runs. All
/// values can be supplied as flags or environment variables (a `.env` file is
/// loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keysweep-coordinator",
    version,
    about = "Coordinates a distributed MD5 preimage search over a numeric keyspace"
)]
pub struct CliArgs {
    /// Target fingerprint to find, as 32 hex characters.
    ///
    /// Environment variable: `TARGET`
    #[arg(long, env = "TARGET")]
    pub target: String,

    /// Number of decimal digits in the keyspace. The search covers
    /// `[0, 10^digits)`.
    ///
    /// Environment variable: `DIGITS`
    #[arg(long, env = "DIGITS")]
    pub digits: u32,

    /// Number of workers that must register before the search starts.
    ///
    /// Environment variable: `PARTICIPANTS`
    #[arg(long, env = "PARTICIPANTS")]
    pub participants: usize,

    /// Address to listen on.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    pub listen_addr: String,

    /// Seconds to wait for every participant to register. `0` waits forever.
    ///
    /// Environment variable: `REGISTRATION_TIMEOUT`
    #[arg(long, env = "REGISTRATION_TIMEOUT", default_value_t = 0)]
    pub registration_timeout: u64,

    /// Seconds to wait for participants to disconnect after the final `ENDED`
    /// broadcast before their connections are dropped.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Lowercase hex digest.
    pub target: String,
    pub keyspace: SearchRange,
    pub participants: usize,
    pub listen_addr: String,
    pub registration_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
}

impl CoordinatorConfig {
    /// Builds a config listening on the default port with no registration
    /// timeout.
    pub fn new(
        target: impl Into<String>,
        keyspace: SearchRange,
        participants: usize,
    ) -> anyhow::Result<Self> {
        let target = target.into().trim().to_ascii_lowercase();
        Md5Decimal.parse_target(&target)?;

        if participants == 0 {
            bail!("PARTICIPANTS must be greater than 0");
        }

        Ok(Self {
            target,
            keyspace,
            participants,
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            registration_timeout: None,
            shutdown_timeout: Duration::from_secs(3),
        })
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub const fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = Some(timeout);
        self
    }

    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl TryFrom<CliArgs> for CoordinatorConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.digits == 0 || args.digits > MAX_KEYSPACE_DIGITS {
            bail!(
                "DIGITS ({}) must be between 1 and {MAX_KEYSPACE_DIGITS}",
                args.digits
            );
        }
        let keyspace = SearchRange::keyspace(args.digits)
            .ok_or_else(|| anyhow!("Overflow in keyspace computation"))?;

        let mut config = Self::new(args.target, keyspace, args.participants)?
            .with_listen_addr(args.listen_addr)
            .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout));
        if args.registration_timeout > 0 {
            config = config.with_registration_timeout(Duration::from_secs(args.registration_timeout));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(target: &str, digits: u32, participants: usize) -> CliArgs {
        CliArgs::parse_from([
            "keysweep-coordinator",
            "--target",
            target,
            "--digits",
            &digits.to_string(),
            "--participants",
            &participants.to_string(),
        ])
    }

    #[test]
    fn builds_keyspace_from_digits() {
        let config =
            CoordinatorConfig::try_from(args("19BC916108FC6938F52CB96F7E087941", 3, 2)).unwrap();
        assert_eq!(config.keyspace, SearchRange::new(0, 1000));
        assert_eq!(config.target, "19bc916108fc6938f52cb96f7e087941");
        assert_eq!(config.listen_addr, "0.0.0.0:12345");
        assert_eq!(config.registration_timeout, None);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_values() {
        let target = "19bc916108fc6938f52cb96f7e087941";
        assert!(CoordinatorConfig::try_from(args(target, 0, 1)).is_err());
        assert!(CoordinatorConfig::try_from(args(target, 20, 1)).is_err());
        assert!(CoordinatorConfig::try_from(args(target, 3, 0)).is_err());
        assert!(CoordinatorConfig::try_from(args("not-a-digest", 3, 1)).is_err());
    }

    #[test]
    fn registration_timeout_zero_means_forever() {
        let mut cli = args("19bc916108fc6938f52cb96f7e087941", 2, 1);
        cli.registration_timeout = 30;
        let config = CoordinatorConfig::try_from(cli).unwrap();
        assert_eq!(config.registration_timeout, Some(Duration::from_secs(30)));
    }
}
