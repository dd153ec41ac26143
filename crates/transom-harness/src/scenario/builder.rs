//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the oracle pattern: a scenario cannot run without a verification
//! function.

use std::time::Instant;

use transom_core::{Connection, ConnectionConfig, OriginFilter, Role};
use transom_proto::Origin;

use crate::{
    scenario::{OracleFn, World},
    sim_env::SimEnv,
};

/// Scenario builder.
///
/// Pairs one initiator and one acceptor, runs the full handshake over a
/// simulated channel, and hands the resulting [`World`] to the oracle.
pub struct Scenario {
    name: String,
    initiator_origin: Origin,
    acceptor_origin: Origin,
    filter: Option<OriginFilter>,
    timing: ConnectionConfig,
    seed: u64,
}

impl Scenario {
    /// Create a scenario with default origins and a filter that admits the
    /// initiator.
    pub fn new(name: impl Into<String>) -> Self {
        let initiator_origin = Origin::new("https://initiator.example");
        Self {
            name: name.into(),
            filter: Some(OriginFilter::whitelist([initiator_origin.clone()])),
            initiator_origin,
            acceptor_origin: Origin::new("https://acceptor.example"),
            timing: ConnectionConfig::default(),
            seed: 0,
        }
    }

    /// Replace the acceptor's origin filter.
    #[must_use]
    pub fn with_filter(mut self, filter: OriginFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Leave the acceptor unconfigured, exercising the deny-all default.
    #[must_use]
    pub fn without_filter(mut self) -> Self {
        self.filter = None;
        self
    }

    /// Override the keepalive timing constants.
    #[must_use]
    pub fn with_timing(mut self, timing: ConnectionConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Seed for the deterministic environment.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// Creates both machines, routes every handshake message until the
    /// channel falls quiet, then runs the oracle over the final world.
    pub fn run(self) -> Result<(), String> {
        let Scenario { name, initiator_origin, acceptor_origin, filter, timing, seed } =
            self.scenario;

        let env = SimEnv::with_seed(seed);
        let now = Instant::now();

        let (initiator, initiator_opening) = Connection::establish(
            env.clone(),
            initiator_origin,
            Role::Initiator { peer_origin: acceptor_origin.clone() },
            timing.clone(),
            now,
        );
        let (acceptor, acceptor_opening) = Connection::establish(
            env,
            acceptor_origin,
            Role::Acceptor { filter },
            timing,
            now,
        );

        let mut world = World::new(initiator, acceptor, initiator_opening, acceptor_opening);
        world.run_until_quiet(now);

        (self.oracle)(&world).map_err(|e| format!("scenario '{name}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_requires_oracle() {
        // This compiles - oracle provided.
        let _scenario = Scenario::new("test").oracle(Box::new(|_world| Ok(())));

        // This would NOT compile - no oracle:
        // Scenario::new("test").run();
    }

    #[test]
    fn scenario_runs_a_full_handshake() {
        Scenario::new("basic handshake")
            .oracle(Box::new(|world| {
                if !world.initiator().is_active() {
                    return Err("initiator should be active".to_string());
                }
                if !world.acceptor().is_active() {
                    return Err("acceptor should be active".to_string());
                }
                Ok(())
            }))
            .run()
            .unwrap();
    }
}
