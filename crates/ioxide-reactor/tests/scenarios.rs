use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ioxide_reactor::{Dispatcher, ReactorError, Reason, WatchState};

#[test]
fn test_one_shot_timer_within_monitor_window() {
    let dispatcher = Dispatcher::new();
    let started = Instant::now();
    let seen: Rc<RefCell<Vec<(Reason, Duration)>>> = Rc::default();

    let log = seen.clone();
    dispatcher
        .after(Duration::from_millis(500), move |_, _, reason| {
            log.borrow_mut().push((reason, started.elapsed()));
            Ok(())
        })
        .unwrap();

    dispatcher.monitor(Some(Duration::from_secs(1))).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(950));

    let seen = seen.borrow();
    let fires: Vec<_> = seen.iter().filter(|(r, _)| *r == Reason::Fire).collect();
    assert_eq!(fires.len(), 1);
    let at = fires[0].1;
    assert!(at >= Duration::from_millis(480) && at <= Duration::from_millis(1100), "{at:?}");
    // Expired by itself
    assert_eq!(seen.last().map(|(r, _)| *r), Some(Reason::Cancel));
    assert_eq!(dispatcher.watch_count(), 0);
}

#[test]
fn test_idle_task_survives_monitor() {
    let dispatcher = Dispatcher::new();
    let idles = Rc::new(RefCell::new(0u32));

    let count = idles.clone();
    let id = dispatcher
        .when_idle(move |_, _, reason| {
            if reason == Reason::Idle {
                *count.borrow_mut() += 1;
            }
            Ok(())
        })
        .unwrap();

    dispatcher.monitor(Some(Duration::from_millis(200))).unwrap();
    assert!(*idles.borrow() >= 1);
    assert!(dispatcher.contains(id));
    assert_eq!(dispatcher.watch_state(id), Some(WatchState::Rearmed));
}

#[test]
fn test_timers_before_idle() {
    let dispatcher = Dispatcher::new();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let log = order.clone();
    dispatcher
        .when_idle(move |_, _, reason| {
            if reason == Reason::Idle {
                log.borrow_mut().push("idle");
            }
            Ok(())
        })
        .unwrap();
    for name in ["first", "second"] {
        let log = order.clone();
        dispatcher
            .after(Duration::ZERO, move |_, _, reason| {
                if reason == Reason::Fire {
                    log.borrow_mut().push(name);
                }
                Ok(())
            })
            .unwrap();
    }

    dispatcher.monitor(Some(Duration::from_millis(10))).unwrap();
    let order = order.borrow();
    assert_eq!(&order[..3], &["first", "second", "idle"]);
}

#[test]
fn test_exhausted_and_destroyed() {
    let dispatcher = Dispatcher::new();
    assert!(matches!(dispatcher.monitor(None), Err(ReactorError::Exhausted)));

    dispatcher.when_idle(|_, _, _| Ok(())).unwrap();
    dispatcher.destroy().unwrap();
    assert!(matches!(
        dispatcher.monitor(Some(Duration::ZERO)),
        Err(ReactorError::Destroyed)
    ));
    assert!(matches!(dispatcher.destroy(), Err(ReactorError::Destroyed)));
}
