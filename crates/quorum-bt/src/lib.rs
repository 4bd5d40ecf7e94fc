//! Behavior-tree node engine shared by the quorum workspace.
//!
//! Nodes form a tagged tree over leaves and a fixed set of composites and
//! decorators. Every composite carries its own resumption state, so a tree
//! can be ticked once per simulation step and pick up where it left off.
//! Leaves are opaque action values executed through an [`ActionRunner`]
//! supplied by the caller; the engine itself never touches domain state.

use serde::{Deserialize, Serialize};

/// Tri-state result produced by every node tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Failure,
    Running,
}

impl Status {
    /// Returns true for `Success` and `Failure`.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Swaps `Success` and `Failure`, passing `Running` through.
    #[must_use]
    pub const fn invert(self) -> Self {
        match self {
            Self::Success => Self::Failure,
            Self::Failure => Self::Success,
            Self::Running => Self::Running,
        }
    }
}

/// Executes leaf actions on behalf of the engine.
pub trait ActionRunner<A> {
    /// Run one leaf action and report its status.
    fn run(&mut self, action: &A) -> Status;

    /// Called when a `Retry` decorator spends all of its attempts without the
    /// child resolving to `Success` or `Running`. The returned status becomes
    /// the decorator's result.
    fn on_exhausted(&mut self, _max_attempts: u32) -> Status {
        Status::Failure
    }
}

/// A behavior-tree node over leaf actions of type `A`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<A> {
    /// Wraps a single domain action.
    Leaf(A),
    /// Ticks children in order, resuming at the last unresolved child.
    Sequence { children: Vec<Node<A>>, cursor: usize },
    /// Ticks children in order until one succeeds, resuming at the last running child.
    Selector { children: Vec<Node<A>>, cursor: usize },
    /// Ticks every child on every call; succeeds as soon as one child succeeds.
    Parallel { children: Vec<Node<A>> },
    /// Swaps the child's `Success` and `Failure`.
    Inverter(Box<Node<A>>),
    /// Re-ticks a failing child synchronously, up to `max_attempts` invocations.
    Retry { child: Box<Node<A>>, max_attempts: u32 },
    /// Re-ticks a succeeding child. A negative bound repeats forever, one pass per tick.
    Repeat {
        child: Box<Node<A>>,
        max_iterations: i64,
        completed: i64,
    },
}

impl<A> Node<A> {
    #[must_use]
    pub const fn leaf(action: A) -> Self {
        Self::Leaf(action)
    }

    #[must_use]
    pub const fn sequence(children: Vec<Node<A>>) -> Self {
        Self::Sequence {
            children,
            cursor: 0,
        }
    }

    #[must_use]
    pub const fn selector(children: Vec<Node<A>>) -> Self {
        Self::Selector {
            children,
            cursor: 0,
        }
    }

    #[must_use]
    pub const fn parallel(children: Vec<Node<A>>) -> Self {
        Self::Parallel { children }
    }

    #[must_use]
    pub fn inverter(child: Node<A>) -> Self {
        Self::Inverter(Box::new(child))
    }

    /// Builds a retry decorator. A bound of zero is treated as one attempt.
    #[must_use]
    pub fn retry(child: Node<A>, max_attempts: u32) -> Self {
        Self::Retry {
            child: Box::new(child),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Builds a repeat decorator; `max_iterations < 0` means unbounded.
    #[must_use]
    pub fn repeat(child: Node<A>, max_iterations: i64) -> Self {
        Self::Repeat {
            child: Box::new(child),
            max_iterations,
            completed: 0,
        }
    }

    /// Tick this node once, executing leaves through `runner`.
    pub fn tick<R>(&mut self, runner: &mut R) -> Status
    where
        R: ActionRunner<A> + ?Sized,
    {
        match self {
            Self::Leaf(action) => runner.run(action),
            Self::Sequence { children, cursor } => {
                while let Some(child) = children.get_mut(*cursor) {
                    match child.tick(runner) {
                        Status::Success => *cursor += 1,
                        Status::Running => return Status::Running,
                        Status::Failure => {
                            reset_children(children, cursor);
                            return Status::Failure;
                        }
                    }
                }
                reset_children(children, cursor);
                Status::Success
            }
            Self::Selector { children, cursor } => {
                while let Some(child) = children.get_mut(*cursor) {
                    match child.tick(runner) {
                        Status::Failure => *cursor += 1,
                        Status::Running => return Status::Running,
                        Status::Success => {
                            reset_children(children, cursor);
                            return Status::Success;
                        }
                    }
                }
                reset_children(children, cursor);
                Status::Failure
            }
            Self::Parallel { children } => {
                let mut any_success = false;
                let mut any_running = false;
                // No short-circuit: every child observes this tick.
                for child in children.iter_mut() {
                    match child.tick(runner) {
                        Status::Success => any_success = true,
                        Status::Running => any_running = true,
                        Status::Failure => {}
                    }
                }
                let status = if any_success {
                    Status::Success
                } else if any_running {
                    Status::Running
                } else {
                    Status::Failure
                };
                if status.is_resolved() {
                    children.iter_mut().for_each(Node::reset);
                }
                status
            }
            Self::Inverter(child) => child.tick(runner).invert(),
            Self::Retry {
                child,
                max_attempts,
            } => {
                let attempts = (*max_attempts).max(1);
                for _ in 0..attempts {
                    match child.tick(runner) {
                        Status::Failure => child.reset(),
                        status => return status,
                    }
                }
                runner.on_exhausted(attempts)
            }
            Self::Repeat {
                child,
                max_iterations,
                completed,
            } => {
                if *max_iterations < 0 {
                    // Unbounded: one pass per external tick.
                    return match child.tick(runner) {
                        Status::Success => {
                            child.reset();
                            Status::Running
                        }
                        status => status,
                    };
                }
                while *completed < *max_iterations {
                    match child.tick(runner) {
                        Status::Success => *completed += 1,
                        Status::Running => return Status::Running,
                        Status::Failure => {
                            *completed = 0;
                            return Status::Failure;
                        }
                    }
                }
                *completed = 0;
                Status::Success
            }
        }
    }

    /// Clears all resumption state in this subtree.
    pub fn reset(&mut self) {
        match self {
            Self::Leaf(_) => {}
            Self::Sequence { children, cursor } | Self::Selector { children, cursor } => {
                reset_children(children, cursor);
            }
            Self::Parallel { children } => children.iter_mut().for_each(Node::reset),
            Self::Inverter(child) | Self::Retry { child, .. } => child.reset(),
            Self::Repeat {
                child, completed, ..
            } => {
                *completed = 0;
                child.reset();
            }
        }
    }

    /// Number of leaves reachable from this node.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Sequence { children, .. }
            | Self::Selector { children, .. }
            | Self::Parallel { children } => children.iter().map(Node::leaf_count).sum(),
            Self::Inverter(child) | Self::Retry { child, .. } | Self::Repeat { child, .. } => {
                child.leaf_count()
            }
        }
    }
}

fn reset_children<A>(children: &mut [Node<A>], cursor: &mut usize) {
    *cursor = 0;
    children.iter_mut().for_each(Node::reset);
}
