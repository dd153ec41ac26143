//! Token-based handler registries.
//!
//! Handlers themselves are opaque to the state machine; the registries track
//! only equality-comparable tokens issued at registration time, in
//! registration order. The runtime maps tokens to actual callbacks, so
//! removal is "find the token and drop it" on both sides rather than
//! function-identity comparison.

use std::collections::HashMap;

use transom_proto::Route;

/// Opaque handle identifying one registered handler.
///
/// Returned at registration; pass it back to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Ordered registry of handler tokens for one event category.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    entries: Vec<HandlerId>,
}

impl HandlerRegistry {
    /// Append a token.
    pub fn register(&mut self, id: HandlerId) {
        self.entries.push(id);
    }

    /// Remove a token. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        match self.entries.iter().position(|entry| *entry == id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            },
            None => false,
        }
    }

    /// Registered tokens, in registration order.
    #[must_use]
    pub fn ids(&self) -> &[HandlerId] {
        &self.entries
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-route registries for request handlers.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: HashMap<Route, Vec<HandlerId>>,
}

impl RouteRegistry {
    /// Append a token under `route`.
    pub fn register(&mut self, route: Route, id: HandlerId) {
        self.routes.entry(route).or_default().push(id);
    }

    /// Remove a token from `route`. Returns `false` if it was not there.
    pub fn remove(&mut self, route: &Route, id: HandlerId) -> bool {
        let Some(entries) = self.routes.get_mut(route) else {
            return false;
        };
        match entries.iter().position(|entry| *entry == id) {
            Some(idx) => {
                entries.remove(idx);
                if entries.is_empty() {
                    self.routes.remove(route);
                }
                true
            },
            None => false,
        }
    }

    /// Whether any handler is registered for `route`.
    #[must_use]
    pub fn has_route(&self, route: &Route) -> bool {
        self.routes.contains_key(route)
    }

    /// Tokens registered for `route`, in registration order.
    #[must_use]
    pub fn ids(&self, route: &Route) -> &[HandlerId] {
        self.routes.get(route).map_or(&[], Vec::as_slice)
    }

    /// Drop every registration for every route.
    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = HandlerRegistry::default();
        let ids: Vec<_> = (0..4).map(HandlerId::new).collect();
        for id in &ids {
            registry.register(*id);
        }
        assert_eq!(registry.ids(), ids.as_slice());
    }

    #[test]
    fn remove_drops_only_the_matching_token() {
        let mut registry = HandlerRegistry::default();
        let a = HandlerId::new(1);
        let b = HandlerId::new(2);
        registry.register(a);
        registry.register(b);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.ids(), &[b]);
    }

    #[test]
    fn route_registry_tracks_routes_independently()  {
        let mut registry = RouteRegistry::default();
        let greet = Route::parse("app:greet").unwrap();
        let list = Route::parse("app:list").unwrap();
        let a = HandlerId::new(1);
        let b = HandlerId::new(2);

        registry.register(greet.clone(), a);
        registry.register(greet.clone(), b);
        assert!(registry.has_route(&greet));
        assert!(!registry.has_route(&list));
        assert_eq!(registry.ids(&greet), &[a, b]);

        assert!(registry.remove(&greet, a));
        assert!(registry.remove(&greet, b));
        assert!(!registry.has_route(&greet));
    }
}
