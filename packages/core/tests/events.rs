#![allow(unused)]

//! Tests for multicast events: multi-shot identity, send gating, posting,
//! and the timed awaitables built on them.

mod common;

use common::{run_single, Log};
use frameflow_core::prelude::*;
use frameflow_core::Event;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn multi_shot_events_survive_firing() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let chime = Event::new("chime", false);

                let ring = frame("ring", |_this, (chime, seconds): (Arc<Event>, f64)| {
                    async move {
                        sleep(seconds)?.wait().await?;
                        chime.send(val(seconds)).wait().await?;
                        Ok(none())
                    }
                });
                ring.spawn((chime.clone(), 0.05))?;
                ring.spawn((chime.clone(), 0.1))?;

                let first = chime.wait().await?;
                log.push(format!("rang {}", first.get::<f64>().unwrap()));
                assert!(!chime.removed());
                let second = chime.wait().await?;
                log.push(format!("rang {}", second.get::<f64>().unwrap()));
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    log.assert_messages(&["rang 0.05", "rang 0.1"]);
}

#[test]
fn send_completion_gates_on_every_handler() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let signal = Event::new("signal", false);

                let echo = frame("echo", {
                    let log = log.clone();
                    move |_this, (signal, tag): (Arc<Event>, &'static str)| {
                        let log = log.clone();
                        async move {
                            signal.wait().await?;
                            log.push(tag);
                            Ok(none())
                        }
                    }
                });
                echo.spawn((signal.clone(), "first"))?;
                echo.spawn((signal.clone(), "second"))?;
                sleep(0.02)?.wait().await?;

                signal.send(none()).wait().await?;
                log.push("sent");
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    // both handlers ran before the send gate released the sender
    log.assert_messages(&["first", "second", "sent"]);
}

#[test]
fn post_delivers_through_the_loop() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let pulse = Event::new("pulse", true);
                pulse.post(val(9i32), Duration::from_millis(50))?;
                let value = pulse.wait().await?;
                log.push(format!("pulse {}", value.get::<i32>().unwrap()));
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    log.assert_messages(&["pulse 9"]);
    log.assert_logged_around("pulse 9", 0.05, 0.15);
}

#[test]
fn event_removal_wakes_listeners_with_the_stored_result() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let doomed = Event::new("doomed", true);
                let watcher = frame("watcher", {
                    let log = log.clone();
                    move |_this, doomed: Arc<Event>| {
                        let log = log.clone();
                        async move {
                            let value = doomed.wait().await?;
                            log.push(format!("released ({})", value.is_none()));
                            Ok(none())
                        }
                    }
                });
                let watching = watcher.spawn(doomed.clone())?;
                sleep(0.02)?.wait().await?;

                let removed = doomed.remove().wait().await?;
                assert_eq!(removed.get::<bool>(), Some(&true));
                let again = doomed.remove().wait().await?;
                assert_eq!(again.get::<bool>(), Some(&false));

                watching.wait().await?;
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    log.assert_messages(&["released (true)"]);
}

#[test]
fn animate_reaches_full_progress() {
    let progress: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
    let main = frame("main", {
        let progress = progress.clone();
        move |_this, ()| {
            let progress = progress.clone();
            async move {
                let ticks = animate(
                    0.1,
                    {
                        let progress = progress.clone();
                        move |value| progress.lock().unwrap().push(value)
                    },
                    0.02,
                )?;
                ticks.wait().await?;
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    let progress = progress.lock().unwrap();
    assert!(progress.len() >= 2, "expected several ticks, got {progress:?}");
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(*progress.last().unwrap(), 1.0);
}

#[test]
fn zero_duration_sleep_fires_on_the_next_turn() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                sleep(0.0)?.wait().await?;
                log.push("woke");
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    log.assert_logged_around("woke", 0.0, 0.1);
}
