use evloop_log::Level;

#[test]
fn test_log() {
    evloop_log::subscriber::fmt()
        .with_max_level(Level::TRACE)
        .init();

    evloop_log::debug!("debug");
    evloop_log::error!("error");
    evloop_log::event!(Level::DEBUG, "event");
    evloop_log::info!("info");
    evloop_log::warn!("warn");
    evloop_log::trace!("trace");
}
