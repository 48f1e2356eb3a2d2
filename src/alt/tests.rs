use crate::alt::Alt;
use crate::job::{Fault, Job};
use crate::runtime::Builder;
use crate::sync::Channel;
use anyhow::Result;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

assert_impl_all!(Alt<u64>: Send);

fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn always_roundtrip() -> Result<()> {
    let rt = Builder::new().worker_threads(1).try_build()?;
    assert_eq!(rt.run(Alt::always(9u64).pick()).unwrap(), 9);
    Ok(())
}

#[test]
fn choose_prefers_the_leftmost_ready_branch() -> Result<()> {
    let rt = Builder::new().worker_threads(1).try_build()?;
    let alt = Alt::choose([Alt::always(1u64), Alt::always(2u64)]);
    assert_eq!(rt.run(alt.pick()).unwrap(), 1);
    Ok(())
}

#[test]
fn never_is_never_available() -> Result<()> {
    let rt = Builder::new().worker_threads(1).try_build()?;
    let alt = Alt::choose([Alt::never(), Alt::always(3u64)]);
    assert_eq!(rt.run(alt.pick()).unwrap(), 3);
    Ok(())
}

#[test]
fn wrap_composes_like_function_composition() -> Result<()> {
    let rt = Builder::new().worker_threads(1).try_build()?;
    let alt = Alt::always(2u64).wrap(|x| x * 10).wrap(|x| x + 1);
    assert_eq!(rt.run(alt.pick()).unwrap(), 21);
    Ok(())
}

#[test]
fn wrap_applies_to_channel_results() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let ch: Channel<u64> = Channel::new();
    rt.spawn(ch.send(4));
    let got = rt.run(ch.take().wrap(|v| v + 100).pick()).unwrap();
    assert_eq!(got, 104);
    Ok(())
}

#[test]
fn pending_choice_is_resolved_by_a_later_party() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let ch1: Channel<u64> = Channel::new();
    let ch2: Channel<u64> = Channel::new();

    let tx = ch2.clone();
    rt.spawn(Job::sleep(Duration::from_millis(10)).seq(tx.send(5)));

    let got = rt
        .run(Alt::choose([ch1.take(), ch2.take()]).pick())
        .unwrap();
    assert_eq!(got, 5);
    Ok(())
}

#[test]
fn guard_effects_run_at_pick_time() -> Result<()> {
    let rt = Builder::new().worker_threads(1).try_build()?;
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let alt = Alt::guard(move |_wr| {
        seen.fetch_add(1, Ordering::SeqCst);
        Alt::always(5u64)
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0, "guard must be lazy");
    assert_eq!(rt.run(alt.pick()).unwrap(), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn guard_panic_faults_the_picking_job() -> Result<()> {
    let rt = Builder::new().worker_threads(1).try_build()?;
    let res = rt.run(Alt::<u64>::guard(|_wr| panic!("guard boom")).pick());
    match res {
        Err(Fault::Panic(msg)) => assert!(msg.contains("guard boom")),
        other => panic!("expected a panic fault, got {other:?}"),
    }
    Ok(())
}

#[test]
fn selective_give_or_take() -> Result<()> {
    let rt = Builder::new().worker_threads(4).try_build()?;
    let a: Channel<u64> = Channel::new();
    let b: Channel<u64> = Channel::new();
    let results: Channel<String> = Channel::new();

    // Two jobs race the same two-way choice; a third party resolves one
    // branch at a time.
    for _ in 0..2 {
        let give_a = a.clone();
        let take_b = b.clone();
        let out = results.clone();
        rt.spawn(
            Alt::choose([
                give_a.give(1).wrap(|()| "gave-a".to_string()),
                take_b.take().wrap(|v| format!("took-b-{v}")),
            ])
            .pick()
            .and_then(move |tag| out.send(tag)),
        );
    }

    // Exactly one of the two wins on `a`...
    assert_eq!(rt.run(a.recv()).unwrap(), 1);
    // ...and the other can only win on `b` once we act.
    rt.run(b.send(2)).unwrap();

    let mut tags = vec![
        rt.run(results.recv()).unwrap(),
        rt.run(results.recv()).unwrap(),
    ];
    tags.sort();
    assert_eq!(tags, vec!["gave-a".to_string(), "took-b-2".to_string()]);
    Ok(())
}

#[test]
fn timeout_race_yields_timeout_and_cleans_up_lazily() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let ch: Channel<String> = Channel::new();

    let start = Instant::now();
    let got = rt
        .run(
            Alt::choose([
                ch.take(),
                Alt::after(Duration::from_millis(50)).wrap(|()| "timeout".to_string()),
            ])
            .pick(),
        )
        .unwrap();
    assert_eq!(got, "timeout");
    assert!(start.elapsed() >= Duration::from_millis(50));

    // The stale taker left on the channel must not swallow a later give.
    rt.spawn(ch.send("fresh".to_string()));
    assert_eq!(rt.run(ch.recv()).unwrap(), "fresh");
    Ok(())
}

#[test]
fn with_nack_fires_exactly_once_on_loss() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let released = Arc::new(AtomicUsize::new(0));

    let rel = released.clone();
    let alt = Alt::choose([
        Alt::with_nack(move |wr, nack| {
            let rel = rel.clone();
            wr.spawn(nack.pick().map(move |()| {
                rel.fetch_add(1, Ordering::SeqCst);
            }));
            Alt::never()
        }),
        Alt::always(7u64),
    ]);
    assert_eq!(rt.run(alt.pick()).unwrap(), 7);

    assert!(wait_until(Duration::from_secs(5), || released
        .load(Ordering::SeqCst)
        == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(released.load(Ordering::SeqCst), 1, "nack fired twice");
    Ok(())
}

#[test]
fn with_nack_does_not_fire_for_the_winning_branch() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let released = Arc::new(AtomicUsize::new(0));

    let rel = released.clone();
    let alt = Alt::choose([
        Alt::with_nack(move |wr, nack| {
            let rel = rel.clone();
            wr.spawn(nack.pick().map(move |()| {
                rel.fetch_add(1, Ordering::SeqCst);
            }));
            Alt::always(1u64)
        }),
        Alt::never(),
    ]);
    assert_eq!(rt.run(alt.pick()).unwrap(), 1);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(released.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn wrap_abort_starts_the_abort_job_on_loss() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let aborted = Arc::new(AtomicUsize::new(0));
    let ch: Channel<u64> = Channel::new();

    let ab = aborted.clone();
    let alt = Alt::choose([
        ch.take().wrap_abort(Job::delay(move |_| {
            ab.fetch_add(1, Ordering::SeqCst);
            Job::unit(())
        })),
        Alt::always(3u64),
    ]);
    assert_eq!(rt.run(alt.pick()).unwrap(), 3);
    assert!(wait_until(Duration::from_secs(5), || aborted
        .load(Ordering::SeqCst)
        == 1));
    Ok(())
}

#[test]
fn sleep_waits_at_least_the_requested_time() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let start = Instant::now();
    rt.run(Job::sleep(Duration::from_millis(30))).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
    Ok(())
}

fn cell_loop(put: Channel<u64>, get: Channel<u64>, value: u64) -> Job<()> {
    let take_put = put.clone();
    let give_get = get.clone();
    Alt::choose([take_put.take(), give_get.give(value).wrap(move |()| value)])
        .pick()
        .and_then(move |next| cell_loop(put, get, next))
}

#[test]
fn cell_server_serialises_reads_and_writes() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let put: Channel<u64> = Channel::new();
    let get: Channel<u64> = Channel::new();
    rt.spawn(cell_loop(put.clone(), get.clone(), 1));

    assert_eq!(rt.run(get.recv()).unwrap(), 1);
    rt.run(put.send(2)).unwrap();
    assert_eq!(rt.run(get.recv()).unwrap(), 2);
    Ok(())
}

fn client_loop(put: Channel<u64>, get: Channel<u64>, done: Channel<()>, rounds: u64) -> Job<()> {
    if rounds == 0 {
        return done.send(());
    }
    let tx = put.clone();
    let rx = get.clone();
    tx.send(rounds)
        .seq(rx.recv())
        .and_then(move |_| client_loop(put, get, done, rounds - 1))
}

#[test]
fn cell_server_survives_concurrent_clients() -> Result<()> {
    let rt = Builder::new().worker_threads(4).try_build()?;
    let put: Channel<u64> = Channel::new();
    let get: Channel<u64> = Channel::new();
    let done: Channel<()> = Channel::new();
    rt.spawn(cell_loop(put.clone(), get.clone(), 0));

    let clients = 10;
    for _ in 0..clients {
        rt.spawn(client_loop(put.clone(), get.clone(), done.clone(), 20));
    }
    for _ in 0..clients {
        rt.run(done.recv()).unwrap();
    }
    Ok(())
}

#[rstest]
#[case::small(1_000)]
#[case::large(10_000)]
fn many_jobs_share_one_channel(#[case] n: usize) -> Result<()> {
    let rt = Builder::new().worker_threads(4).try_build()?;
    let ch: Channel<u64> = Channel::new();
    let count = Arc::new(AtomicUsize::new(0));

    let mut jobs = Vec::with_capacity(2 * n);
    for i in 0..n {
        jobs.push(ch.send(i as u64));
        let seen = count.clone();
        jobs.push(ch.recv().map(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
    }
    fastrand::shuffle(&mut jobs);
    for job in jobs {
        rt.spawn(job);
    }

    assert!(wait_until(Duration::from_secs(60), || count
        .load(Ordering::SeqCst)
        == n));
    Ok(())
}
