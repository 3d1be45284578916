#![allow(unused)]

//! Tests for the multi-threaded pool: affinity, cross-worker sends, PFrames.

mod common;

use common::{init_tracing, Log, Shared};
use frameflow_core::prelude::*;
use frameflow_core::{AnyValue, AwaitableRef};
use std::sync::{Arc, Mutex};

#[test]
fn cross_worker_send_gates_on_the_listener() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let signal = Event::new("signal", false);

                let listener = frame("listener", {
                    let log = log.clone();
                    let signal = signal.clone();
                    move |_this, ()| {
                        let log = log.clone();
                        let signal = signal.clone();
                        async move {
                            let value = signal.wait().await?;
                            log.push(format!("woke with {}", value.get::<u32>().unwrap()));
                            Ok(none())
                        }
                    }
                })
                .pinned_to(2);

                let sender = frame("sender", {
                    let log = log.clone();
                    let signal = signal.clone();
                    move |_this, ()| {
                        let log = log.clone();
                        let signal = signal.clone();
                        async move {
                            signal.send(val(7u32)).wait().await?;
                            log.push("send finished");
                            Ok(none())
                        }
                    }
                })
                .pinned_to(3);

                let listening = listener.spawn(())?;
                // give the listener time to register on its worker
                sleep(0.05)?.wait().await?;
                let sending = sender.spawn(())?;
                listening.and(&*sending).wait().await?;
                Ok(none())
            }
        }
    });
    init_tracing();
    TimerLoop::new().run(&main, (), 4).unwrap();
    // the send gate completed only after the listener's handler returned
    log.assert_messages(&["woke with 7", "send finished"]);
}

#[test]
fn pframes_run_on_any_worker() {
    let seen: Shared<Vec<usize>> = Arc::new(Mutex::new(Vec::new()));
    let main = frame("main", {
        let seen = seen.clone();
        move |_this, ()| {
            let seen = seen.clone();
            async move {
                let task = pframe("task", |_this, index: usize| async move {
                    sleep(0.02)?.wait().await?;
                    Ok(val(index))
                });
                let spawned: Vec<AwaitableRef> = (0..8)
                    .map(|index| task.spawn(index).map(|frame| frame as AwaitableRef))
                    .collect::<Result<_, _>>()?;
                let results = all(spawned).wait().await?;
                let results = results.get::<Vec<AnyValue>>().expect("ordered results");
                for result in results {
                    seen.lock().unwrap().push(*result.get::<usize>().unwrap());
                }
                Ok(none())
            }
        }
    });
    init_tracing();
    TimerLoop::new().run(&main, (), 4).unwrap();
    // input order survives no matter which workers stepped the bodies
    assert_eq!(&*seen.lock().unwrap(), &[0, 1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn run_refuses_reentry_on_a_loop_thread() {
    let main = frame("main", move |_this, ()| async move {
        let inner = frame("inner", |_this, ()| async move { Ok(none()) });
        let reentry = TimerLoop::new().run(&inner, (), 1);
        assert!(matches!(reentry, Err(Error::InvalidOperation(_))));
        Ok(none())
    });
    TimerLoop::new().run(&main, (), 1).unwrap();
}

#[test]
fn sequential_runs_reuse_the_calling_thread() {
    for round in 0..3 {
        let main = frame("main", move |_this, ()| async move {
            sleep(0.01)?.wait().await?;
            Ok(val(round))
        });
        let result = TimerLoop::new().run(&main, (), 1).unwrap();
        assert_eq!(result.get::<i32>(), Some(&round));
    }
}

#[test]
fn pinned_frames_keep_their_worker_affinity() {
    let workers: Shared<Vec<(String, bool)>> = Arc::new(Mutex::new(Vec::new()));
    let main = frame("main", {
        let workers = workers.clone();
        move |_this, ()| {
            let workers = workers.clone();
            async move {
                let probe = frame("probe", {
                    let workers = workers.clone();
                    move |_this, tag: String| {
                        let workers = workers.clone();
                        async move {
                            // both steps of this body must land on worker 1
                            let first = std::thread::current().id();
                            sleep(0.02)?.wait().await?;
                            let second = std::thread::current().id();
                            workers.lock().unwrap().push((tag, first == second));
                            Ok(none())
                        }
                    }
                })
                .pinned_to(1);
                let a = probe.spawn("a".into())?;
                let b = probe.spawn("b".into())?;
                a.and(&*b).wait().await?;
                Ok(none())
            }
        }
    });
    init_tracing();
    TimerLoop::new().run(&main, (), 3).unwrap();
    let workers = workers.lock().unwrap();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|(_, same)| *same));
}
