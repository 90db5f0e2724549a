//! The dispatcher (tick entry: load, CAS-claim, run, release) and the
//! execution loop (the per-stage interpreter it hands a claimed instance
//! to).

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::flow::{FlowSpec, Transition};
use crate::instance::{InstanceData, StageStatus};
use crate::persistence::{StatePersister, StoreError};

use super::registry::{candidate_kinds_for, encode_event, FlowEntry};

/// Tick entry point. Loads the instance, acts on its status, and, only on
/// a successful `Pending -> Running` claim, hands it to the execution
/// loop.
pub(crate) async fn dispatch<F: FlowSpec, P: StatePersister<F>>(
    entry: &FlowEntry<F, P>,
    instance_id: Uuid,
) -> Result<(), DispatchError> {
    let data = entry.persister.load(instance_id).await?;

    match data.status {
        StageStatus::Error => {
            debug!(%instance_id, "instance is in Error, awaiting retry");
            Ok(())
        }
        StageStatus::Completed | StageStatus::Cancelled => {
            debug!(%instance_id, status = %data.status, "instance already at rest");
            Ok(())
        }
        StageStatus::Running => {
            debug!(%instance_id, "instance already claimed by another worker");
            Ok(())
        }
        StageStatus::Pending => {
            let applied = entry
                .persister
                .try_transition_stage_status(
                    instance_id,
                    &data.stage,
                    StageStatus::Pending,
                    StageStatus::Running,
                )
                .await?;
            if !applied {
                return Err(DispatchError::CasLost(instance_id));
            }
            entry
                .history
                .record_status_changed(
                    entry.flow_id.as_str(),
                    instance_id,
                    StageStatus::Pending,
                    StageStatus::Running,
                )
                .await;

            let data = entry.persister.load(instance_id).await?;
            run_loop(entry, data).await
        }
    }
}

/// Repeats the advancement step until the instance reaches a terminal
/// resting point (`Completed`/`Cancelled`) or releases its claim to wait
/// for an event.
async fn run_loop<F: FlowSpec, P: StatePersister<F>>(
    entry: &FlowEntry<F, P>,
    mut data: InstanceData<F>,
) -> Result<(), DispatchError> {
    loop {
        let from_stage = data.stage.to_string();
        let def = entry
            .flow
            .stage(&data.stage)
            .expect("every reachable stage is defined, checked at build time");

        if def.action.is_none() {
            if let Some(handlers) = def.event_handlers() {
                let candidates = candidate_kinds_for(entry, &data.stage);
                let instance_id = data.flow_instance_id;

                let peeked = match entry.event_store.peek(&entry.flow_id, instance_id, &candidates).await {
                    Ok(peeked) => peeked,
                    Err(store_err) => return Err(store_failure(entry, instance_id, store_err).await),
                };

                if let Some(stored) = peeked {
                    let matched = handlers.iter().find(|(event, _)| {
                        encode_event(*event) == (stored.event_type.clone(), stored.event_value.clone())
                    });

                    if let Some((event, handler)) = matched {
                        let target = handler.resolve(&data.state);
                        let event_rendered = event.to_string();
                        data.stage = target.clone();
                        data = match entry.persister.save(data).await {
                            Ok(data) => data,
                            Err(store_err) => return Err(store_failure(entry, instance_id, store_err).await),
                        };
                        if let Err(store_err) = entry.event_store.delete(stored.id).await {
                            return Err(store_failure(entry, instance_id, store_err).await);
                        }
                        entry
                            .history
                            .record_stage_changed(
                                &entry.flow_id,
                                instance_id,
                                &from_stage,
                                &target.to_string(),
                                Some(&event_rendered),
                            )
                            .await;
                        continue;
                    }
                }

                // No matching event: release the claim back to Pending.
                data.status = StageStatus::Pending;
                data = match entry.persister.save(data).await {
                    Ok(data) => data,
                    Err(store_err) => return Err(store_failure(entry, instance_id, store_err).await),
                };
                entry
                    .history
                    .record_status_changed(
                        &entry.flow_id,
                        instance_id,
                        StageStatus::Running,
                        StageStatus::Pending,
                    )
                    .await;

                // An event may have arrived between our peek and the
                // release write, and its own tick may have been delivered
                // and ignored while we held the claim. Re-peek and
                // compensate with an extra tick rather than risk losing
                // the event's wakeup entirely.
                let still_pending = match entry.event_store.peek(&entry.flow_id, instance_id, &candidates).await {
                    Ok(peeked) => peeked,
                    Err(store_err) => return Err(store_failure(entry, instance_id, store_err).await),
                };
                if still_pending.is_some() {
                    if let Err(store_err) = entry.tick_scheduler.schedule_tick(&entry.flow_id, instance_id).await {
                        return Err(store_failure(entry, instance_id, store_err).await);
                    }
                }
                return Ok(());
            }
        }

        let action_result = match &def.action {
            Some(action) => action(&data.state).map_err(|source| (from_stage.clone(), source)),
            None => Ok(None),
        };

        let new_state = match action_result {
            Ok(new_state) => new_state,
            Err((stage, source)) => {
                let message = source.to_string();
                let stack_trace = format!("{source:?}");
                let err = DispatchError::ActionFailure { stage, source };
                return fail_instance(entry, data, err, "action_failure", &message, Some(&stack_trace)).await;
            }
        };
        if let Some(new_state) = new_state {
            data.state = new_state;
        }

        if def.is_terminal() {
            let instance_id = data.flow_instance_id;
            data.status = StageStatus::Completed;
            data = match entry.persister.save(data).await {
                Ok(data) => data,
                Err(store_err) => return Err(store_failure(entry, instance_id, store_err).await),
            };
            entry
                .history
                .record_status_changed(
                    &entry.flow_id,
                    instance_id,
                    StageStatus::Running,
                    StageStatus::Completed,
                )
                .await;
            return Ok(());
        }

        let next_stage = match def
            .transition
            .as_ref()
            .expect("non-terminal stage has a transition, checked at build time")
        {
            Transition::Next(stage) => stage.clone(),
            Transition::Condition(handler) => handler.resolve(&data.state),
            Transition::Events(_) => {
                // An action-bearing stage cannot also declare event
                // handlers: rejected at build time.
                unreachable!("action stages cannot declare event handlers")
            }
        };

        let instance_id = data.flow_instance_id;
        data.stage = next_stage.clone();
        data = match entry.persister.save(data).await {
            Ok(data) => data,
            Err(store_err) => return Err(store_failure(entry, instance_id, store_err).await),
        };
        entry
            .history
            .record_stage_changed(&entry.flow_id, instance_id, &from_stage, &next_stage.to_string(), None)
            .await;
    }
}

/// A persister/event-store/tick-scheduler call inside the loop failed. The
/// `InstanceData` mid-write may already be consumed by the failed call, so
/// this reloads the row fresh, marks it `Error`, records a history entry,
/// and returns the error to re-raise.
async fn store_failure<F: FlowSpec, P: StatePersister<F>>(
    entry: &FlowEntry<F, P>,
    instance_id: Uuid,
    err: StoreError,
) -> DispatchError {
    let message = err.to_string();
    warn!(%err, %instance_id, "store operation failed, recording Error");

    match entry.persister.load(instance_id).await {
        Ok(mut data) => {
            data.status = StageStatus::Error;
            if let Err(save_err) = entry.persister.save(data).await {
                warn!(%save_err, %instance_id, "failed to persist Error status after store failure");
            }
        }
        Err(load_err) => {
            warn!(%load_err, %instance_id, "failed to reload instance after store failure");
        }
    }

    entry
        .history
        .record_error(&entry.flow_id, instance_id, "store_error", &message, None)
        .await;

    DispatchError::Store(err)
}

/// Records the instance as `Error` and appends a history row before
/// re-raising the original failure to the caller (the worker pool logs it).
async fn fail_instance<F: FlowSpec, P: StatePersister<F>>(
    entry: &FlowEntry<F, P>,
    mut data: InstanceData<F>,
    err: DispatchError,
    error_type: &str,
    message: &str,
    stack_trace: Option<&str>,
) -> Result<(), DispatchError> {
    let instance_id = data.flow_instance_id;
    warn!(%err, %instance_id, "action failed, recording Error");
    data.status = StageStatus::Error;
    if let Err(save_err) = entry.persister.save(data).await {
        warn!(%save_err, %instance_id, "failed to persist Error status after action failure");
    }
    entry
        .history
        .record_error(&entry.flow_id, instance_id, error_type, message, stack_trace)
        .await;
    Err(err)
}
