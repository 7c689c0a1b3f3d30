//! Tether Runtime
//!
//! Small host binary: loads settings, binds a few native types and
//! containers, drives them the way a script would, then collects.
//!
//! Usage: `tether [settings.json]`

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::rc::Rc;
use tether_script::{define_usertype, AsTable, Filter, ScriptState, Settings, Value};

#[derive(Debug, Clone, Default)]
struct Inventory {
    owner: String,
    items: Vec<String>,
}

define_usertype!(Inventory);

fn load_settings() -> Result<Settings> {
    match std::env::args().nth(1) {
        Some(path) => Settings::load(&path).with_context(|| format!("loading {path}")),
        None => Ok(Settings::default()),
    }
}

fn bind(state: &mut ScriptState) {
    state
        .new_usertype::<Inventory>("inventory")
        .constructor(|(owner,): (String,)| Inventory {
            owner,
            items: Vec::new(),
        })
        .readonly_field("owner", |i| &i.owner, |i| &mut i.owner)
        .field("items", |i| &i.items, |i| &mut i.items)
        .filters("items", [Filter::SelfDependency])
        .method("count", |i: &Inventory, ()| i.items.len())
        .display(|i| format!("inventory of {} ({} items)", i.owner, i.items.len()))
        .register();
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Tether v{}", tether_core::VERSION);
    let settings = load_settings()?;
    let mut state = ScriptState::with_settings(settings);
    bind(&mut state);

    // A native vector shared with the script side by reference
    let scores = Rc::new(RefCell::new(vec![1_i64, 2, 3]));
    state.set("scores", scores.clone())?;
    let proxy = state.get_global("scores");
    state.set_index(&proxy, 4, 99)?;
    tracing::info!(scores = ?scores.borrow(), len = state.len(&proxy)?, "appended through proxy");

    let class = state.get_global("inventory");
    let new = state.index(&class, &Value::from("new"))?;
    let inventory = state
        .call(&new, vec![Value::from("ada")])?
        .into_iter()
        .next()
        .context("constructor returned nothing")?;
    let items = state.index(&inventory, &Value::from("items"))?;
    state.call_method(&items, "add", vec![Value::from("lamp")])?;
    state.call_method(&items, "add", vec![Value::from("rope")])?;
    tracing::info!("{}", state.tostring(&inventory)?);

    let snapshot = state.push(AsTable(scores.borrow().clone()))?;
    tracing::info!(entries = state.ipairs(&snapshot)?.len(), "snapshot taken");

    // only the items proxy stays reachable; the inventory is kept by it
    state.set_global("items", items);
    let report = state.collect_garbage();
    tracing::info!(report = %serde_json::to_string(&report)?, "first pass");

    state.set_global("items", Value::Nil);
    state.set_global("scores", Value::Nil);
    let report = state.collect_garbage();
    tracing::info!(report = %serde_json::to_string(&report)?, "second pass");

    for (name, value) in state.counters().snapshot() {
        tracing::info!(counter = name, value, "metrics");
    }
    Ok(())
}
