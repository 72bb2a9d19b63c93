//! A cooperative job scheduler.
//!
//! A job runs until it needs results of other jobs. At that point it returns the jobs it depends on
//! and is suspended until all of them complete, then it is resumed at the step it has saved.
//! Ready jobs are kept in a stack so the search proceeds depth-first.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use crate::error::OptimizerError;

/// The result of one invocation of a job.
pub enum Step<J> {
    /// The job has completed.
    Done,
    /// The job must be resumed after the given jobs complete.
    Spawn(Vec<J>),
}

/// A unit of work executed by a [Scheduler].
pub trait Job: Display + Sized {
    /// Identifies the work performed by a job. At most one job with the same key can be active at a time.
    type Key: Clone + Eq + Hash;
    type Context;

    fn key(&self) -> Self::Key;

    fn run(&mut self, ctx: &mut Self::Context) -> Result<Step<Self>, OptimizerError>;

    /// Called for jobs that have not completed when the scheduler has been interrupted.
    fn abandon(self, _ctx: &mut Self::Context) {}
}

/// The result of [Scheduler::run].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// All jobs have completed.
    Completed,
    /// The scheduler has been interrupted before all jobs have completed.
    Interrupted(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct JobId(usize);

struct Entry<J: Job> {
    job: Option<J>,
    key: J::Key,
    parent: Option<JobId>,
    /// The number of jobs this job waits for.
    pending: usize,
    /// Jobs that wait for this job but have not spawned it.
    waiters: Vec<JobId>,
}

pub struct Scheduler<J: Job> {
    entries: Vec<Option<Entry<J>>>,
    free: Vec<usize>,
    ready: Vec<JobId>,
    active: HashMap<J::Key, JobId>,
    executed: usize,
}

impl<J: Job> Scheduler<J> {
    pub fn new() -> Self {
        Scheduler {
            entries: Vec::new(),
            free: Vec::new(),
            ready: Vec::new(),
            active: HashMap::new(),
            executed: 0,
        }
    }

    /// The number of job invocations performed by this scheduler.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Runs the given job and all jobs it depends on.
    ///
    /// `interrupt` is called before every invocation of a job. When it returns a value the scheduler stops,
    /// abandons all unfinished jobs and returns that value. The first error returned by a job or by
    /// `interrupt` aborts the run.
    pub fn run<F, T>(&mut self, root: J, ctx: &mut J::Context, mut interrupt: F) -> Result<Outcome<T>, OptimizerError>
    where
        F: FnMut(&J::Context) -> Result<Option<T>, OptimizerError>,
    {
        self.spawn(root, None);

        while let Some(id) = self.ready.pop() {
            match interrupt(&*ctx) {
                Ok(None) => {}
                Ok(Some(value)) => {
                    self.abandon(ctx);
                    return Ok(Outcome::Interrupted(value));
                }
                Err(e) => {
                    self.clear();
                    return Err(e);
                }
            }

            let mut job = self.entry_mut(id)?.job.take().ok_or_else(|| OptimizerError::internal("Job is not ready"))?;
            log::debug!("{}", job);
            self.executed += 1;

            let step = match job.run(ctx) {
                Ok(step) => step,
                Err(e) => {
                    self.clear();
                    return Err(e);
                }
            };
            match step {
                Step::Done => self.complete(id)?,
                Step::Spawn(jobs) => {
                    self.entry_mut(id)?.job = Some(job);
                    for child in jobs {
                        self.spawn(child, Some(id));
                    }
                    if self.entry_mut(id)?.pending == 0 {
                        self.ready.push(id);
                    }
                }
            }
        }

        if self.active.is_empty() {
            Ok(Outcome::Completed)
        } else {
            let message = format!("Job scheduler deadlock. Jobs left: {}", self.active.len());
            self.clear();
            Err(OptimizerError::internal(message))
        }
    }

    fn spawn(&mut self, job: J, parent: Option<JobId>) {
        let key = job.key();
        if let Some(existing) = self.active.get(&key).copied() {
            let parent = match parent {
                Some(parent) => parent,
                None => return,
            };
            // The same work is in progress. Waiting for a job that (transitively) waits for the parent
            // would never end so in that case the parent continues with the results available so far.
            if self.depends_on(parent, existing) {
                log::debug!(" ~ {} (in progress)", job);
                return;
            }
            if let Some(Some(entry)) = self.entries.get_mut(existing.0) {
                entry.waiters.push(parent);
            }
            if let Some(Some(entry)) = self.entries.get_mut(parent.0) {
                entry.pending += 1;
            }
            return;
        }

        log::debug!(" + {}", job);
        let entry = Entry {
            job: Some(job),
            key: key.clone(),
            parent,
            pending: 0,
            waiters: Vec::new(),
        };
        let id = match self.free.pop() {
            Some(index) => {
                self.entries[index] = Some(entry);
                JobId(index)
            }
            None => {
                self.entries.push(Some(entry));
                JobId(self.entries.len() - 1)
            }
        };
        self.active.insert(key, id);
        if let Some(parent) = parent {
            if let Some(Some(entry)) = self.entries.get_mut(parent.0) {
                entry.pending += 1;
            }
        }
        self.ready.push(id);
    }

    /// Returns `true` if the given job is `target` or waits for `target` to complete.
    fn depends_on(&self, job: JobId, target: JobId) -> bool {
        let mut stack = vec![job];
        let mut visited = Vec::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            if let Some(Some(entry)) = self.entries.get(current.0) {
                stack.extend(entry.parent);
                stack.extend(entry.waiters.iter().copied());
            }
        }
        false
    }

    fn complete(&mut self, id: JobId) -> Result<(), OptimizerError> {
        let entry = self.entries[id.0].take().ok_or_else(|| OptimizerError::internal("Unknown job"))?;
        self.free.push(id.0);
        self.active.remove(&entry.key);

        for dependent in entry.parent.into_iter().chain(entry.waiters) {
            let dependent_entry = self.entry_mut(dependent)?;
            dependent_entry.pending -= 1;
            if dependent_entry.pending == 0 {
                self.ready.push(dependent);
            }
        }
        Ok(())
    }

    fn entry_mut(&mut self, id: JobId) -> Result<&mut Entry<J>, OptimizerError> {
        match self.entries.get_mut(id.0) {
            Some(Some(entry)) => Ok(entry),
            _ => Err(OptimizerError::internal(format!("Unknown job: {}", id.0))),
        }
    }

    fn abandon(&mut self, ctx: &mut J::Context) {
        for entry in self.entries.drain(..).flatten() {
            if let Some(job) = entry.job {
                job.abandon(ctx);
            }
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
        self.ready.clear();
        self.active.clear();
    }
}

impl<J: Job> Default for Scheduler<J> {
    fn default() -> Self {
        Scheduler::new()
    }
}
