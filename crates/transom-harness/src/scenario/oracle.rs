//! Oracle helpers for scenario verification.
//!
//! An oracle inspects the final [`World`] and decides whether the scenario
//! held its properties. The helpers below cover the common checks; compose
//! them with [`all_of`] or write a closure for anything bespoke.

use transom_core::ConnectionError;

use crate::scenario::World;

/// Verification function run over the final world state.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;

/// Combine oracles; every one must pass.
#[must_use]
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in &oracles {
            oracle(world)?;
        }
        Ok(())
    })
}

/// Both sides announced establishment and are active.
#[must_use]
pub fn all_established() -> OracleFn {
    Box::new(|world| {
        if !world.initiator_record().established {
            return Err("initiator never announced establishment".to_string());
        }
        if !world.acceptor_record().established {
            return Err("acceptor never announced establishment".to_string());
        }
        if !world.initiator().is_active() {
            return Err(format!("initiator should be active, is {:?}", world.initiator().state()));
        }
        if !world.acceptor().is_active() {
            return Err(format!("acceptor should be active, is {:?}", world.acceptor().state()));
        }
        Ok(())
    })
}

/// Each side's recorded peer origin is the other side's real origin.
#[must_use]
pub fn peer_origins_verified() -> OracleFn {
    Box::new(|world| {
        let initiator_peer = world.initiator().peer_origin().ok_or("initiator has no peer origin")?;
        let acceptor_peer = world.acceptor().peer_origin().ok_or("acceptor has no peer origin")?;

        if initiator_peer != world.acceptor().local_origin() {
            return Err(format!(
                "initiator's peer origin should be {}, got {initiator_peer}",
                world.acceptor().local_origin()
            ));
        }
        if acceptor_peer != world.initiator().local_origin() {
            return Err(format!(
                "acceptor's peer origin should be {}, got {acceptor_peer}",
                world.initiator().local_origin()
            ));
        }
        Ok(())
    })
}

/// The acceptor's filter rejected the peer and the nascent connection died.
#[must_use]
pub fn acceptor_rejected() -> OracleFn {
    Box::new(|world| {
        match world.acceptor_record().establish_error {
            Some(ConnectionError::UnexpectedPeer { .. }) => {},
            ref other => {
                return Err(format!("expected an UnexpectedPeer rejection, got {other:?}"));
            },
        }
        if world.acceptor().is_active() {
            return Err("rejected acceptor should not be active".to_string());
        }
        Ok(())
    })
}
