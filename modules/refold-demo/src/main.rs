mod app;
mod config;

use anyhow::Result;
use futures::StreamExt;
use refold::{SelectExt, Store};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::{DemoAction, Milestones, Tally};
use crate::config::DemoConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("refold=info".parse()?))
        .init();

    let config = DemoConfig::from_env()?;
    let store = Store::builder(app::root_reducer())
        .name("demo")
        .effect(app::root_effect(&config))
        .build()?;

    let mut ticks = Box::pin(
        store
            .states()
            .subscribe()
            .select_map(|state| state.get::<Tally>("tally").map(|tally| tally.ticks)),
    );
    let mut actions = store.actions().subscribe();

    info!("Starting ticker");
    store.dispatch(DemoAction::Start.to_action()?);

    loop {
        tokio::select! {
            Some(tally) = ticks.next() => {
                if let Some(count) = tally {
                    println!("ticks: {count}");
                }
            }
            Some(action) = actions.next() => match action.decode::<DemoAction>() {
                Ok(DemoAction::Milestone { ticks }) => info!(ticks, "Milestone reached"),
                Ok(DemoAction::Stopped) => break,
                _ => {}
            },
            else => break,
        }
    }

    let state = store.state();
    let summary = json!({
        "tally": state.get::<Tally>("tally").map(|tally| tally.as_ref().clone()),
        "milestones": state.get::<Milestones>("milestones").map(|m| m.reached.clone()),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Done");
    Ok(())
}
