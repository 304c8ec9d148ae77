//! Step pipeline engine
//!
//! A [`Pipeline`] is a named, ordered list of [`Node`]s. A node is a single
//! [`Step`], a nested pipeline, or a [`Branch`] that picks one of two nodes
//! from a predicate evaluated when the branch is reached. Running a pipeline
//! is fail-fast: the first error stops the run and is returned as is.

use std::fmt;

use futures::future::BoxFuture;
use pgaas_common::metrics::{record_step, StepOutcome};
use pgaas_common::Result;
use tracing::debug;

use crate::context::Context;

/// Future returned by a step action
pub type StepFuture<'a> = BoxFuture<'a, Result<()>>;

type Action = Box<dyn for<'a> Fn(&'a mut Context) -> StepFuture<'a> + Send + Sync>;
type ResultHandler = Box<dyn Fn(&str, &Context, &Result<()>) + Send + Sync>;
type Predicate = Box<dyn Fn(&Context) -> bool + Send + Sync>;

/// One effect against the context
pub struct Step {
    name: String,
    action: Action,
    on_result: Option<ResultHandler>,
}

impl Step {
    /// Create a step from an async action
    ///
    /// ```ignore
    /// Step::new("ensure-namespace", |ctx| Box::pin(namespace::ensure(ctx)))
    /// ```
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> StepFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
            on_result: None,
        }
    }

    /// Observe the step's outcome; called with the step path, the context
    /// and the result. The result is propagated unchanged.
    pub fn with_result_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&str, &Context, &Result<()>) + Send + Sync + 'static,
    {
        self.on_result = Some(Box::new(handler));
        self
    }

    /// Step name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Runs `then` when the predicate holds, otherwise `otherwise` (if any)
pub struct Branch {
    name: String,
    predicate: Predicate,
    then: Box<Node>,
    otherwise: Option<Box<Node>>,
}

impl Branch {
    /// Branch that runs `then` only when `predicate` holds
    pub fn when<P>(name: impl Into<String>, predicate: P, then: impl Into<Node>) -> Self
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            then: Box::new(then.into()),
            otherwise: None,
        }
    }

    /// Node to run when the predicate does not hold
    pub fn otherwise(mut self, node: impl Into<Node>) -> Self {
        self.otherwise = Some(Box::new(node.into()));
        self
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("then", &self.then)
            .field("otherwise", &self.otherwise)
            .finish()
    }
}

/// Element of a pipeline
#[derive(Debug)]
pub enum Node {
    /// A single step
    Step(Step),
    /// A nested, named pipeline
    Sequence(Pipeline),
    /// A predicate-gated choice
    Branch(Branch),
}

impl Node {
    fn name(&self) -> &str {
        match self {
            Node::Step(s) => &s.name,
            Node::Sequence(p) => &p.name,
            Node::Branch(b) => &b.name,
        }
    }
}

impl From<Step> for Node {
    fn from(step: Step) -> Self {
        Node::Step(step)
    }
}

impl From<Pipeline> for Node {
    fn from(pipeline: Pipeline) -> Self {
        Node::Sequence(pipeline)
    }
}

impl From<Branch> for Node {
    fn from(branch: Branch) -> Self {
        Node::Branch(branch)
    }
}

/// Paths of the steps and branches visited by a successful run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Steps that ran, in order
    pub executed: Vec<String>,
    /// Nodes skipped because a branch predicate did not select them
    pub skipped: Vec<String>,
}

/// Named, ordered sequence of nodes
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    nodes: Vec<Node>,
}

impl Pipeline {
    /// Empty pipeline
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Append a node
    pub fn then(mut self, node: impl Into<Node>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every node in order against `ctx`, stopping at the first error
    pub async fn run(&self, ctx: &mut Context) -> Result<RunReport> {
        let mut report = RunReport::default();
        run_sequence(self, ctx, "", &mut report).await?;
        Ok(report)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn run_sequence<'a>(
    pipeline: &'a Pipeline,
    ctx: &'a mut Context,
    prefix: &'a str,
    report: &'a mut RunReport,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let path = join(prefix, &pipeline.name);
        for node in &pipeline.nodes {
            run_node(node, ctx, &path, report).await?;
        }
        Ok(())
    })
}

fn run_node<'a>(
    node: &'a Node,
    ctx: &'a mut Context,
    prefix: &'a str,
    report: &'a mut RunReport,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        match node {
            Node::Step(step) => {
                let path = join(prefix, &step.name);
                debug!(step = %path, "running step");
                let result = (step.action)(ctx).await;
                record_step(
                    &path,
                    if result.is_ok() {
                        StepOutcome::Ok
                    } else {
                        StepOutcome::Error
                    },
                );
                if let Some(handler) = &step.on_result {
                    handler(&path, &*ctx, &result);
                }
                if let Err(e) = &result {
                    debug!(step = %path, error = %e, "step failed");
                }
                report.executed.push(path);
                result
            }
            Node::Sequence(pipeline) => run_sequence(pipeline, ctx, prefix, report).await,
            Node::Branch(branch) => {
                let path = join(prefix, &branch.name);
                let (chosen, skipped) = if (branch.predicate)(&*ctx) {
                    (Some(&*branch.then), branch.otherwise.as_deref())
                } else {
                    (branch.otherwise.as_deref(), Some(&*branch.then))
                };
                if let Some(skipped) = skipped {
                    debug!(branch = %path, skipped = %skipped.name(), "branch not taken");
                    report.skipped.push(join(&path, skipped.name()));
                }
                match chosen {
                    Some(node) => run_node(node, ctx, &path, report).await,
                    None => Ok(()),
                }
            }
        }
    })
}
