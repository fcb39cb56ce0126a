//! Route table
//!
//! A static mapping from command name to the local processor that handles
//! it, collected at configuration time. Consumers use it twice: to declare
//! interest in every routed command when a stream opens, and to stamp the
//! processor hint onto inbound commands that lack one.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Route {
    pub command: String,
    pub processor: String,
}

impl Route {
    pub fn new(command: impl Into<String>, processor: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            processor: processor.into(),
        }
    }
}

/// Ordered route collection. The first route for a command wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn lookup_processor(&self, command: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.command == command)
            .map(|r| r.processor.as_str())
    }

    /// Distinct command names in declaration order.
    pub fn commands(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for route in &self.routes {
            if !seen.contains(&route.command.as_str()) {
                seen.push(route.command.as_str());
            }
        }
        seen
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}

impl FromIterator<Route> for RouteTable {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests;
