use std::collections::HashMap;

use cask_schema::{Cask, Token};
use tracing::debug;

use crate::catalog::CaskLoader;
use crate::error::{CaskError, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Walk<'a> {
    loader: &'a dyn CaskLoader,
    marks: HashMap<Token, Mark>,
    stack: Vec<Token>,
    order: Vec<Token>,
}

/// Returns the casks that must be installed before `target`, dependencies first.
///
/// Descriptors are loaded lazily on first visit. A dependency whose descriptor
/// cannot be loaded is kept as a leaf; the installer reports it when it tries
/// to install it. Independent dependencies keep their declaration order.
///
/// # Errors
///
/// [`CaskError::SelfDependency`] when a cask lists its own token,
/// [`CaskError::CyclicDependency`] for any other cycle.
pub fn resolve(target: &Cask, loader: &dyn CaskLoader) -> Result<Vec<Token>> {
    let mut walk = Walk {
        loader,
        marks: HashMap::new(),
        stack: Vec::new(),
        order: Vec::new(),
    };

    walk.visit(&target.token, &target.depends_on.cask)?;

    // The target itself is last in post-order.
    walk.order.pop();
    debug!(target = %target.token, order = ?walk.order, "Resolved dependencies");
    Ok(walk.order)
}

impl Walk<'_> {
    fn visit(&mut self, token: &Token, deps: &[Token]) -> Result<()> {
        if deps.contains(token) {
            return Err(CaskError::SelfDependency {
                token: token.clone(),
            });
        }

        self.marks.insert(token.clone(), Mark::Visiting);
        self.stack.push(token.clone());

        for dep in deps {
            match self.marks.get(dep) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let start = self.stack.iter().position(|t| t == dep).unwrap_or(0);
                    let mut cycle = self.stack[start..].to_vec();
                    cycle.push(dep.clone());
                    return Err(CaskError::CyclicDependency {
                        token: self.stack[0].clone(),
                        cycle,
                    });
                }
                None => match self.loader.load(dep) {
                    Ok(cask) => self.visit(dep, &cask.depends_on.cask)?,
                    Err(CaskError::CaskUnavailable { .. }) => {
                        debug!(dependency = %dep, "Descriptor not found, treating as leaf");
                        self.marks.insert(dep.clone(), Mark::Done);
                        self.order.push(dep.clone());
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        self.stack.pop();
        self.marks.insert(token.clone(), Mark::Done);
        self.order.push(token.clone());
        Ok(())
    }
}
