use std::{cell::Cell, rc::Rc};

use evloop::{Loop, RunMode};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let lp = Loop::new().expect("failed to create loop");

    let ticks = Rc::new(Cell::new(0));
    let timer = lp.timer_init();
    let ticks_cb = ticks.clone();
    let lp_cb = lp.clone();
    lp.timer_start(timer, 10, 10, move |h| {
        ticks_cb.set(ticks_cb.get() + 1);
        if ticks_cb.get() == 5 {
            let _ = lp_cb.close(h, |_| {});
        }
    })
    .expect("timer_start");

    lp.run(RunMode::Default);
    println!("ticks: {}", ticks.get());
}
