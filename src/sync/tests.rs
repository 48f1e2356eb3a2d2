use crate::job::Job;
use crate::runtime::Builder;
use crate::sync::Channel;
use anyhow::Result;
use rstest::rstest;
use static_assertions::assert_impl_all;

assert_impl_all!(Channel<u64>: Send, Sync, Clone);

#[test]
fn give_then_take() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let ch: Channel<u64> = Channel::new();
    rt.spawn(ch.send(5));
    assert_eq!(rt.run(ch.recv()).unwrap(), 5);
    Ok(())
}

#[test]
fn take_then_give() -> Result<()> {
    let rt = Builder::new().worker_threads(2).try_build()?;
    let ch: Channel<u64> = Channel::new();
    let done: Channel<u64> = Channel::new();

    let forward = done.clone();
    rt.spawn(ch.recv().and_then(move |v| forward.send(v)));
    rt.run(ch.send(7)).unwrap();
    assert_eq!(rt.run(done.recv()).unwrap(), 7);
    Ok(())
}

#[test]
fn rendezvous_is_synchronous() -> Result<()> {
    // A giver does not proceed until its taker commits: the giver's
    // follow-up runs only after the rendezvous happened.
    let rt = Builder::new().worker_threads(2).try_build()?;
    let ch: Channel<u64> = Channel::new();
    let after_give: Channel<&'static str> = Channel::new();

    let mark = after_give.clone();
    rt.spawn(ch.send(1).and_then(move |()| mark.send("gave")));

    assert_eq!(rt.run(ch.recv()).unwrap(), 1);
    assert_eq!(rt.run(after_give.recv()).unwrap(), "gave");
    Ok(())
}

#[rstest]
#[case::few(10)]
#[case::many(200)]
fn every_giver_meets_exactly_one_taker(#[case] n: u64) -> Result<()> {
    let rt = Builder::new().worker_threads(4).try_build()?;
    let ch: Channel<u64> = Channel::new();
    let results: Channel<u64> = Channel::new();

    // Spawn in a random interleaving so registration order varies between
    // runs.
    let mut jobs: Vec<Job<()>> = Vec::new();
    for i in 0..n {
        jobs.push(ch.send(i));
        let out = results.clone();
        let rx = ch.clone();
        jobs.push(rx.recv().and_then(move |v| out.send(v)));
    }
    fastrand::shuffle(&mut jobs);
    for job in jobs {
        rt.spawn(job);
    }

    let mut seen = Vec::with_capacity(n as usize);
    for _ in 0..n {
        seen.push(rt.run(results.recv()).unwrap());
    }
    seen.sort_unstable();
    let expected = (0..n).collect::<Vec<_>>();
    assert_eq!(seen, expected, "no value duplicated or dropped");
    Ok(())
}

#[test]
fn waiters_are_served_in_fifo_order() -> Result<()> {
    let rt = Builder::new().worker_threads(1).try_build()?;
    let ch: Channel<u64> = Channel::new();
    let results: Channel<u64> = Channel::new();

    // Register the takers one at a time (spawn order alone does not pin
    // registration order), then match them; the queue head must always be
    // the next candidate.
    for i in 0..4 {
        let out = results.clone();
        let rx = ch.clone();
        rt.spawn(rx.recv().and_then(move |_| out.send(i)));
        let registered = format!("Channel {{ givers: 0, takers: {} }}", i + 1);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while format!("{ch:?}") != registered {
            assert!(std::time::Instant::now() < deadline, "taker never parked");
            std::thread::yield_now();
        }
    }
    for _ in 0..4 {
        rt.run(ch.send(0)).unwrap();
    }
    for expect in 0..4 {
        assert_eq!(rt.run(results.recv()).unwrap(), expect);
    }
    Ok(())
}

#[test]
fn channel_debug_reports_queue_sizes() {
    let ch: Channel<u64> = Channel::new();
    assert_eq!(format!("{ch:?}"), "Channel { givers: 0, takers: 0 }");
}
