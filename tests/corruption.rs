//! Stream-corruption latching under mid-frame send failure.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::Recorder;
use framelink::Error;

static TEST_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn test_mid_frame_failure_latches_and_stays_latched() {
    let _lock = TEST_LOCK.lock().unwrap();
    common::init_logging();
    framelink::start().unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = framelink::create_client("127.0.0.1", port, Recorder::new()).unwrap();
    let (peer, _) = listener.accept().unwrap();

    // A sender pushes max-size frames without the peer reading, until the
    // socket buffers fill and a send blocks mid-payload.
    let sent = Arc::new(AtomicUsize::new(0));
    let sender = {
        let sent = Arc::clone(&sent);
        std::thread::spawn(move || {
            let payload = vec![0x41u8; framelink::MAX_PAYLOAD_LEN];
            loop {
                match framelink::send(client, &payload) {
                    Ok(()) => {
                        sent.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => return e,
                }
            }
        })
    };

    // wait until the sender stalls inside a blocking send: two consecutive
    // readings without progress while the thread is still running
    let mut last = sent.load(Ordering::SeqCst);
    let mut stalls = 0;
    let deadline = Instant::now() + Duration::from_secs(30);
    while stalls < 2 {
        std::thread::sleep(Duration::from_millis(300));
        let now = sent.load(Ordering::SeqCst);
        if now == last {
            stalls += 1;
        } else {
            stalls = 0;
        }
        assert!(Instant::now() < deadline, "sender never filled the socket buffers");
        last = now;
    }

    // vanish with an RST so the blocked mid-payload write fails
    socket2::SockRef::from(&peer)
        .set_linger(Some(Duration::from_secs(0)))
        .unwrap();
    drop(peer);

    let first_err = sender.join().unwrap();
    assert!(
        matches!(first_err, Error::Io(_)),
        "unexpected first failure: {}",
        first_err
    );

    // The interrupted write died mid-payload and latched the sticky flag;
    // once any send reports corruption, every later one must.
    let mut outcomes = Vec::new();
    for _ in 0..10 {
        match framelink::send(client, b"more") {
            Err(Error::DataStreamCorrupted) => outcomes.push(true),
            Err(Error::Io(_)) => outcomes.push(false),
            other => panic!("send after failure returned {:?}", other.map(|_| ())),
        }
    }
    assert!(
        outcomes.iter().any(|latched| *latched),
        "never observed a latched send: {:?}",
        outcomes
    );
    let first_corrupt = outcomes.iter().position(|latched| *latched).unwrap();
    assert!(
        outcomes[first_corrupt..].iter().all(|latched| *latched),
        "corruption flag must be sticky: {:?}",
        outcomes
    );

    framelink::delete_client(client);
    framelink::stop();
}

#[test]
fn test_clean_socket_does_not_latch() {
    let _lock = TEST_LOCK.lock().unwrap();
    common::init_logging();
    framelink::start().unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = framelink::create_client("127.0.0.1", port, Recorder::new()).unwrap();
    let (_peer, _) = listener.accept().unwrap();

    for _ in 0..10 {
        framelink::send(client, b"fine").unwrap();
    }

    framelink::delete_client(client);
    framelink::stop();
}
