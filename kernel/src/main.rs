use std::sync::Arc;

use omx_core::config::ModuleParams;
use omx_kernel::device::OmxDevice;
use omx_kernel::Driver;
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    let mut params = ModuleParams::default();
    params.ifnames = vec!["mx0".to_string()];

    let driver = match Driver::new(params) {
        Ok(driver) => Arc::new(driver),
        Err(err) => {
            eprintln!("omxd: failed to start: {err}");
            std::process::exit(1);
        }
    };

    let cleanup = driver.spawn_cleanup_thread();
    let device = OmxDevice::new(driver.clone());

    info!(boards = device.board_count(), "omxd ready");
    for i in 0..device.board_count() {
        if let Some(board) = device.board_info(i) {
            info!(index = board.index, addr = %board.addr, mtu = board.mtu, "board attached");
        }
    }

    drop(cleanup);
}
