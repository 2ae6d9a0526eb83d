//! A minimal `/`-segment prefix trie mapping request paths to handlers.
//!
//! Routes are registered per method; a lookup miss on the method returns
//! `None` rather than falling back to another method, leaving the caller to
//! decide between a `404` and a `405`.

use std::collections::HashMap;

use crate::method::Method;

struct Node<T> {
    children: HashMap<String, Node<T>>,
    handlers: HashMap<Method, T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self { children: HashMap::new(), handlers: HashMap::new() }
    }
}

/// Maps `(method, path)` to a value of type `T` (typically a handler
/// closure or function pointer), matching only exact paths segment by
/// segment. No wildcards or parameter capture — routes are registered
/// statically at startup.
pub struct Router<T> {
    root: Node<T>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self { root: Node::default() }
    }
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` at `path`. A later call with the
    /// same method and path replaces the earlier handler.
    pub fn insert(&mut self, method: Method, path: &str, handler: T) {
        let mut node = &mut self.root;
        for segment in segments(path) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.handlers.insert(method, handler);
    }

    /// Looks up the handler registered for `method` at `path`, if any path
    /// segment fails to match, or a handler exists for the path but not for
    /// `method`, returns `None`.
    pub fn resolve(&self, method: Method, path: &str) -> Option<&T> {
        let mut node = &self.root;
        for segment in segments(path) {
            node = node.children.get(segment)?;
        }
        node.handlers.get(&method)
    }

    /// Whether any method has a handler registered at `path`, used to
    /// distinguish "no such route" (404) from "wrong method" (405).
    pub fn path_exists(&self, path: &str) -> bool {
        let mut node = &self.root;
        for segment in segments(path) {
            match node.children.get(segment) {
                Some(next) => node = next,
                None => return false,
            }
        }
        !node.handlers.is_empty()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_an_exact_registered_route() {
        let mut router = Router::new();
        router.insert(Method::Get, "/users/list", 1u32);
        assert_eq!(router.resolve(Method::Get, "/users/list"), Some(&1));
    }

    #[test]
    fn root_and_trailing_slash_are_equivalent() {
        let mut router = Router::new();
        router.insert(Method::Get, "/", 7u32);
        assert_eq!(router.resolve(Method::Get, "/"), Some(&7));
        assert_eq!(router.resolve(Method::Get, ""), Some(&7));
    }

    #[test]
    fn missing_path_resolves_to_none() {
        let router: Router<u32> = Router::new();
        assert_eq!(router.resolve(Method::Get, "/nope"), None);
    }

    #[test]
    fn wrong_method_on_a_known_path_resolves_to_none_but_path_exists() {
        let mut router = Router::new();
        router.insert(Method::Get, "/users", 1u32);
        assert_eq!(router.resolve(Method::Post, "/users"), None);
        assert!(router.path_exists("/users"));
    }

    #[test]
    fn later_insert_replaces_earlier_handler() {
        let mut router = Router::new();
        router.insert(Method::Get, "/users", 1u32);
        router.insert(Method::Get, "/users", 2u32);
        assert_eq!(router.resolve(Method::Get, "/users"), Some(&2));
    }
}
