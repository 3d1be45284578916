#![allow(unused)]

//! Tests for the cancellable free phase and primitive lifecycles.

mod common;

use common::{run_single, Log};
use frameflow_core::prelude::*;
use frameflow_core::{Primitive, FRAME};

#[test]
fn free_handlers_can_veto_removal() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let sub = frame("sub", |this, ()| {
                    async move {
                        // veto the first two removal attempts, allow the third
                        let args = this.free().wait().await?;
                        args.get::<FreeArgs>().expect("free args").cancel();
                        let args = this.free().wait().await?;
                        args.get::<FreeArgs>().expect("free args").cancel();
                        this.free().wait().await?;
                        Ok(none())
                    }
                })
                .immediate()
                .spawn(())?;

                for attempt in 1..=4 {
                    let removed = sub.remove().wait().await?;
                    let removed = removed.get::<bool>().expect("a removal flag");
                    log.push(format!("{attempt}:{removed}"));
                }
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    log.assert_messages(&["1:false", "2:false", "3:true", "4:false"]);
}

#[test]
fn free_fires_on_descendants_before_destruction() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let parent = frame("parent", {
                    let log = log.clone();
                    move |this, ()| {
                        let log = log.clone();
                        async move {
                            let _child = frame("child", {
                                let log = log.clone();
                                move |child_this, ()| {
                                    let log = log.clone();
                                    async move {
                                        log.push("child cleanup armed");
                                        child_this.free().wait().await?;
                                        log.push("child freed");
                                        hold().wait().await?;
                                        Ok(none())
                                    }
                                }
                            })
                            .immediate()
                            .spawn(())?;
                            this.free().wait().await?;
                            log.push("parent freed");
                            hold().wait().await?;
                            Ok(none())
                        }
                    }
                })
                .immediate()
                .spawn(())?;

                sleep(0.02)?.wait().await?;
                let removed = parent.remove().wait().await?;
                assert_eq!(removed.get::<bool>(), Some(&true));
                log.push("removed");
                assert!(parent.removed());
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    log.assert_messages(&[
        "child cleanup armed",
        "child freed",
        "parent freed",
        "removed",
    ]);
}

#[test]
fn primitives_are_torn_down_with_their_owner() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let holder = frame("holder", {
                    let log = log.clone();
                    move |_this, ()| {
                        let log = log.clone();
                        async move {
                            let _first = Primitive::with_cleanup("first", &FRAME, {
                                let log = log.clone();
                                move || log.push("first cleaned")
                            })?;
                            let _second = Primitive::with_cleanup("second", &FRAME, {
                                let log = log.clone();
                                move || log.push("second cleaned")
                            })?;
                            hold().wait().await?;
                            Ok(none())
                        }
                    }
                })
                .spawn(())?;

                sleep(0.02)?.wait().await?;
                holder.remove().wait().await?;
                log.push("holder removed");
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    // LIFO teardown: the second primitive goes first
    log.assert_messages(&["second cleaned", "first cleaned", "holder removed"]);
}

#[test]
fn primitives_bind_to_the_declared_owner_class() {
    static INNER_CLASS: FrameClass = FrameClass::subclass("InnerFrame", &FRAME);
    static DETACHED: FrameClass = FrameClass::root("Detached");

    let main = frame("main", move |_this, ()| async move {
        let inner = frame("inner", |_this, ()| async move {
            // binds to the nearest ancestor of INNER_CLASS: this frame
            let bound = Primitive::new("bound", &INNER_CLASS)?;
            assert!(!bound.removed());
            // no ancestor has the detached class
            assert!(Primitive::new("loose", &DETACHED).is_err());
            Ok(none())
        })
        .with_class(&INNER_CLASS)
        .spawn(())?;
        inner.wait().await?;
        Ok(none())
    });
    run_single(&main, ()).unwrap();
}

#[test]
fn explicit_primitive_removal_is_idempotent() {
    let log = Log::new();
    let main = frame("main", {
        let log = log.clone();
        move |_this, ()| {
            let log = log.clone();
            async move {
                let primitive = Primitive::with_cleanup("res", &FRAME, {
                    let log = log.clone();
                    move || log.push("cleaned")
                })?;
                primitive.remove();
                primitive.remove();
                assert!(primitive.removed());
                Ok(none())
            }
        }
    });
    run_single(&main, ()).unwrap();
    log.assert_messages(&["cleaned"]);
}
