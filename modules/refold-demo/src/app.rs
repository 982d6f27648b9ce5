//! The demo's actions, reducers and effects.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use refold::{
    combine_effects, combine_reducers, of_type, Action, ActionStream, Combined, CombinedEffect,
    CombinedReducer, Effect, EffectOutput, StateStream,
};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::config::DemoConfig;

const START: &str = "demo/start";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DemoAction {
    #[serde(rename = "demo/start")]
    Start,
    #[serde(rename = "demo/tick")]
    Tick { n: u32 },
    #[serde(rename = "demo/milestone")]
    Milestone { ticks: u32 },
    #[serde(rename = "demo/stopped")]
    Stopped,
}

impl DemoAction {
    pub fn to_action(&self) -> Result<Action> {
        Ok(Action::encode(self)?)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct Tally {
    pub ticks: u32,
    pub running: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Milestones {
    pub reached: Vec<u32>,
}

fn tally(state: Option<&Arc<Tally>>, action: &Action) -> Arc<Tally> {
    let Some(state) = state else {
        return Arc::default();
    };
    match action.decode::<DemoAction>() {
        Ok(DemoAction::Start) => Arc::new(Tally {
            ticks: 0,
            running: true,
        }),
        Ok(DemoAction::Tick { n }) => Arc::new(Tally {
            ticks: n,
            ..**state
        }),
        Ok(DemoAction::Stopped) => Arc::new(Tally {
            running: false,
            ..**state
        }),
        _ => Arc::clone(state),
    }
}

fn milestones(state: Option<&Arc<Milestones>>, action: &Action) -> Arc<Milestones> {
    let Some(state) = state else {
        return Arc::default();
    };
    match action.decode::<DemoAction>() {
        Ok(DemoAction::Milestone { ticks }) => {
            let mut reached = state.reached.clone();
            reached.push(ticks);
            Arc::new(Milestones { reached })
        }
        _ => Arc::clone(state),
    }
}

pub fn root_reducer() -> CombinedReducer {
    combine_reducers! {
        tally: tally,
        milestones: milestones,
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// On start, tick `ticks` times, one `interval` apart, then report stopped.
fn ticker(ticks: u32, interval: Duration) -> impl Effect<Combined> {
    move |actions: ActionStream, _states: StateStream<Combined>| -> EffectOutput {
        of_type(actions.subscribe(), START)
            .flat_map(move |_| {
                async_stream::stream! {
                    for n in 1..=ticks {
                        sleep(interval).await;
                        yield DemoAction::Tick { n }.to_action();
                    }
                    yield DemoAction::Stopped.to_action();
                }
            })
            .boxed()
    }
}

/// Report a milestone every `every` ticks, reading the already-folded tally.
fn milestone(every: u32) -> impl Effect<Combined> {
    move |actions: ActionStream, states: StateStream<Combined>| -> EffectOutput {
        actions
            .subscribe()
            .filter_map(move |action| {
                let reached = match action.decode::<DemoAction>() {
                    Ok(DemoAction::Tick { .. }) => states
                        .current()
                        .get::<Tally>("tally")
                        .map(|tally| tally.ticks)
                        .filter(|ticks| ticks % every == 0)
                        .map(|ticks| DemoAction::Milestone { ticks }.to_action()),
                    _ => None,
                };
                future::ready(reached)
            })
            .boxed()
    }
}

pub fn root_effect(config: &DemoConfig) -> CombinedEffect<Combined> {
    combine_effects![
        ticker(config.ticks, config.interval),
        milestone(config.milestone_every),
    ]
}
