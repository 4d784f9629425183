//! Stateful property testing for task status transitions and dispatch.
//!
//! Drives the scheduler in managed mode against a recording supervisor and
//! checks it against a model of which tasks are waiting, paused, complete
//! and already handed to the supervisor.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tasker_scheduler::{
    ExecMode, NewTask, ProcessStatus, Scheduler, SchedulerConfig, TaskStatus,
};
use tasker_store::{MemoryStore, TaskStore};
use tokio::runtime::Runtime;

use common::RecordingSupervisor;

/// Operations a client (or a finishing harness) can perform.
#[derive(Debug, Clone)]
pub enum StatusOperation {
    Create { paused: bool },
    Pause(usize),
    Resume(usize),
    /// Attempt to mark complete by hand; always rejected.
    ForceComplete(usize),
    /// The harness for a supervised task finishes.
    Finish(usize),
    Cycle,
}

#[derive(Clone, Debug, Default)]
pub struct StatusModel {
    pub statuses: Vec<TaskStatus>,
    pub supervised: BTreeSet<usize>,
}

impl ReferenceStateMachine for StatusModel {
    type State = Self;
    type Transition = StatusOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let create = any::<bool>().prop_map(|paused| StatusOperation::Create { paused });
        if state.statuses.is_empty() {
            return create.boxed();
        }

        let n = state.statuses.len();
        prop_oneof![
            3 => create,
            2 => (0..n).prop_map(StatusOperation::Pause),
            2 => (0..n).prop_map(StatusOperation::Resume),
            1 => (0..n).prop_map(StatusOperation::ForceComplete),
            2 => (0..n).prop_map(StatusOperation::Finish),
            3 => Just(StatusOperation::Cycle),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            StatusOperation::Create { paused } => {
                state.statuses.push(if *paused {
                    TaskStatus::Paused
                } else {
                    TaskStatus::Wait
                });
            }
            StatusOperation::Pause(i) => state.statuses[*i] = TaskStatus::Paused,
            StatusOperation::Resume(i) => state.statuses[*i] = TaskStatus::Wait,
            StatusOperation::ForceComplete(_) => {}
            StatusOperation::Finish(i) => state.statuses[*i] = TaskStatus::Complete,
            StatusOperation::Cycle => {
                for (i, status) in state.statuses.iter().enumerate() {
                    if *status == TaskStatus::Wait {
                        state.supervised.insert(i);
                    }
                }
            }
        }
        state
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        match transition {
            StatusOperation::Create { .. } | StatusOperation::Cycle => true,
            StatusOperation::Pause(i)
            | StatusOperation::Resume(i)
            | StatusOperation::ForceComplete(i) => *i < state.statuses.len(),
            StatusOperation::Finish(i) => state.supervised.contains(i),
        }
    }
}

pub struct SchedulerHarness {
    runtime: Runtime,
    scheduler: Scheduler,
    supervisor: Arc<RecordingSupervisor>,
}

fn id(i: usize) -> String {
    format!("task-{}", i + 1)
}

impl SchedulerHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        let mut config = SchedulerConfig::default();
        config.exec.mode = ExecMode::Managed;
        config.clean.enabled = false;
        let supervisor = RecordingSupervisor::new();
        let scheduler =
            Scheduler::with_supervisor(Arc::new(MemoryStore::new()), config, supervisor.clone());

        Self {
            runtime,
            scheduler,
            supervisor,
        }
    }

    fn apply_operation(&self, op: &StatusOperation) {
        self.runtime.block_on(async {
            match op {
                StatusOperation::Create { paused } => {
                    let mut new_task = NewTask::new("primes");
                    if *paused {
                        new_task = new_task.with_status(TaskStatus::Paused);
                    }
                    self.scheduler.create(new_task).await.unwrap();
                }
                StatusOperation::Pause(i) => {
                    self.scheduler
                        .set_status(&id(*i), TaskStatus::Paused)
                        .await
                        .unwrap();
                }
                StatusOperation::Resume(i) => {
                    self.scheduler
                        .set_status(&id(*i), TaskStatus::Wait)
                        .await
                        .unwrap();
                }
                StatusOperation::ForceComplete(i) => {
                    assert!(
                        self.scheduler
                            .set_status(&id(*i), TaskStatus::Complete)
                            .await
                            .is_err()
                    );
                }
                StatusOperation::Finish(i) => {
                    let store = self.scheduler.store();
                    let mut task = store.get(&id(*i)).await.unwrap();
                    task.complete(None);
                    store.set(&task).await.unwrap();
                    self.supervisor.set_status(&id(*i), ProcessStatus::Stopped);
                }
                StatusOperation::Cycle => {
                    self.scheduler.cycle().await.unwrap();
                }
            }
        });
    }
}

impl StateMachineTest for SchedulerHarness {
    type SystemUnderTest = Self;
    type Reference = StatusModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        state: Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        let statuses: Vec<TaskStatus> = state.runtime.block_on(async {
            let mut statuses = Vec::new();
            for task_id in state.scheduler.list().await.unwrap() {
                statuses.push(state.scheduler.get(&task_id).await.unwrap().status);
            }
            statuses
        });
        assert_eq!(statuses, ref_state.statuses);

        // every task is started at most once, and only the ones the model expects
        let started = state.supervisor.started_names();
        let unique: BTreeSet<String> = started.iter().cloned().collect();
        assert_eq!(unique.len(), started.len());
        let expected: BTreeSet<String> = ref_state.supervised.iter().map(|i| id(*i)).collect();
        assert_eq!(unique, expected);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn task_status_state_machine(sequential 1..30 => SchedulerHarness);
}
