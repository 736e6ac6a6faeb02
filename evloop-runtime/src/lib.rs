//! The cooperative event loop: handles, requests, timers, streams, and the
//! threadpool bridge.
//!
//! A [`Loop`] multiplexes I/O readiness (via [`evloop_driver`]), timer
//! expiry, and deferred work, invoking user callbacks on the thread that
//! calls [`Loop::run`]. The only operations safe to call from another
//! thread are [`async_handle::AsyncSender::send`] and the threadpool
//! bridge's internals (see [`work`]).

#![warn(missing_docs)]
#![allow(clippy::type_complexity)]

pub mod async_handle;
pub mod error;
pub mod flags;
pub mod handle;
pub mod idle_prepare_check;
pub mod list;
mod loop_core;
pub mod net;
pub mod request;
pub mod stream;
pub mod stub_handles;
pub mod timer;
pub mod timer_heap;
pub mod work;

pub use async_handle::AsyncSender;
pub use error::{Error, Result};
pub use handle::HandleId;
pub use loop_core::{Loop, RunMode};
pub use stream::ReadResult;
pub use work::{WorkId, WorkStatus};

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    use super::*;

    #[test]
    fn single_shot_timer_fires_once_and_exits() {
        let lp = Loop::new().unwrap();
        let fired = Rc::new(Cell::new(0));
        let fired2 = fired.clone();
        let timer = lp.timer_init();
        lp.timer_start(timer, 5, 0, move |_| fired2.set(fired2.get() + 1)).unwrap();
        lp.run(RunMode::Default);
        assert_eq!(fired.get(), 1);
        assert!(!lp.is_active(timer));
        assert_eq!(lp.active_handles(), 0);
    }

    #[test]
    fn periodic_timer_self_cancels_on_tenth_tick() {
        let lp = Loop::new().unwrap();
        let count = Rc::new(Cell::new(0));
        let timer = lp.timer_init();
        let lp2 = lp.clone();
        let count2 = count.clone();
        lp.timer_start(timer, 1, 1, move |h| {
            count2.set(count2.get() + 1);
            if count2.get() == 10 {
                let _ = lp2.close(h, |_| {});
            }
        })
        .unwrap();
        lp.run(RunMode::Default);
        assert_eq!(count.get(), 10);
    }

    #[test]
    fn idle_handle_runs_every_iteration_until_stopped() {
        let lp = Loop::new().unwrap();
        let idle = lp.idle_init();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        let lp2 = lp.clone();
        lp.idle_start(idle, move |h| {
            count2.set(count2.get() + 1);
            if count2.get() == 3 {
                let _ = lp2.idle_stop(h);
                lp2.stop();
            }
        })
        .unwrap();
        lp.run(RunMode::Default);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn nowait_run_never_blocks() {
        let lp = Loop::new().unwrap();
        let start = std::time::Instant::now();
        lp.run(RunMode::NoWait);
        assert!(start.elapsed() < std::time::Duration::from_millis(200));
    }

    #[test]
    fn async_send_coalesces_between_iterations() {
        let lp = Loop::new().unwrap();
        let fired = Rc::new(Cell::new(0));
        let fired2 = fired.clone();
        let a = lp.async_init(move |_| fired2.set(fired2.get() + 1));
        let sender = lp.async_sender(a).unwrap();
        let threads: Vec<_> = (0..2)
            .map(|i| {
                let sender = sender.clone();
                std::thread::spawn(move || {
                    let n = if i == 0 { 20 } else { 8 };
                    for _ in 0..n {
                        let _ = sender.send();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        lp.run(RunMode::NoWait);
        assert!(fired.get() >= 1 && fired.get() <= 28);
        lp.close(a, |_| {}).unwrap();
        lp.run(RunMode::NoWait);
    }

    #[test]
    fn tcp_ping_pong_echoes_and_closes_cleanly() {
        let lp = Loop::new().unwrap();

        let listener = lp.tcp_bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = lp.tcp_getsockname(listener).unwrap();

        let received_by_server = Rc::new(RefCell::new(Vec::new()));
        let received_by_client = Rc::new(RefCell::new(Vec::new()));

        let lp_accept = lp.clone();
        let received_by_server_cb = received_by_server.clone();
        lp.tcp_listen(listener, 128, move |accepted| {
            let server_stream = accepted.expect("accept should succeed");
            let received = received_by_server_cb.clone();
            let lp_read = lp_accept.clone();
            lp_accept
                .read_start(
                    server_stream,
                    |suggested| vec![0u8; suggested],
                    move |result| match result {
                        ReadResult::Data(buf) => {
                            received.borrow_mut().extend_from_slice(buf);
                            let _ = lp_read.write(server_stream, buf.to_vec(), |_| {});
                        }
                        ReadResult::Eof => {
                            let _ = lp_read.close(server_stream, |_| {});
                        }
                        _ => {}
                    },
                )
                .unwrap();
        })
        .unwrap();

        let client = lp.tcp_connect(addr).unwrap();
        lp.write(client, b"PING\n".to_vec(), |r| r.unwrap()).unwrap();

        let received_by_client_cb = received_by_client.clone();
        let lp_client = lp.clone();
        lp.read_start(
            client,
            |suggested| vec![0u8; suggested],
            move |result| {
                if let ReadResult::Data(buf) = result {
                    received_by_client_cb.borrow_mut().extend_from_slice(buf);
                    if received_by_client_cb.borrow().as_slice() == b"PING\n" {
                        let _ = lp_client.close(client, |_| {});
                        lp_client.stop();
                    }
                }
            },
        )
        .unwrap();

        lp.run(RunMode::Default);

        assert_eq!(received_by_server.borrow().as_slice(), b"PING\n");
        assert_eq!(received_by_client.borrow().as_slice(), b"PING\n");
    }

    #[test]
    fn walk_and_close_all_handle_kinds_drains_to_zero_active() {
        let lp = Loop::new().unwrap();

        let timer = lp.timer_init();
        lp.timer_start(timer, 10_000, 0, |_| {}).unwrap();
        let idle = lp.idle_init();
        lp.idle_start(idle, |_| {}).unwrap();
        let prep = lp.prepare_init();
        lp.prepare_start(prep, |_| {}).unwrap();
        let check = lp.check_init();
        lp.check_start(check, |_| {}).unwrap();
        let udp = lp.udp_init();
        lp.udp_start(udp).unwrap();
        let tty = lp.tty_init();
        lp.tty_start(tty).unwrap();
        let async_h = lp.async_init(|_| {});

        let handles = [timer, idle, prep, check, udp, tty, async_h];
        assert_eq!(lp.active_handles(), handles.len());

        let closed = Rc::new(Cell::new(0));
        for h in handles {
            let closed = closed.clone();
            lp.close(h, move |_| closed.set(closed.get() + 1)).unwrap();
        }

        lp.run(RunMode::Default);

        assert_eq!(closed.get(), handles.len());
        assert_eq!(lp.active_handles(), 0);
    }
}
