//! Dependency ordering for service bring-up.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{OrchestrationError, Result};
use crate::registry::ServiceRegistry;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Returns every registered service name in an order where each service
/// comes after all of its dependencies.
///
/// Ties are broken by registration order, so the result is deterministic
/// for a given registry. Unknown dependencies are reported before cycles.
pub fn resolve_order(registry: &ServiceRegistry) -> Result<Vec<String>> {
    for descriptor in registry.descriptors() {
        if let Some(missing) = descriptor
            .dependencies
            .iter()
            .find(|d| !registry.contains(d))
        {
            return Err(OrchestrationError::UnknownDependency {
                service: descriptor.name.clone(),
                dependency: missing.clone(),
            });
        }
    }

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(registry.len());
    let mut path: Vec<&str> = Vec::new();
    let mut order = Vec::with_capacity(registry.len());

    for name in registry.names() {
        visit(registry, name, &mut marks, &mut path, &mut order)?;
    }

    debug!(order = ?order, "Resolved startup order");
    Ok(order)
}

fn visit<'a>(
    registry: &'a ServiceRegistry,
    name: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<()> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Err(OrchestrationError::CircularDependency { cycle });
        }
        None => {}
    }

    let descriptor = registry.require(name)?;
    marks.insert(name, Mark::Visiting);
    path.push(name);

    for dependency in &descriptor.dependencies {
        visit(registry, dependency, marks, path, order)?;
    }

    path.pop();
    marks.insert(name, Mark::Done);
    order.push(name.to_string());
    Ok(())
}
