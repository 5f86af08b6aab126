//! Disconnecting while the script is silent must still kill it.
//!
//! No write fails after the client leaves, so only dropping the response body
//! can cancel the session.

mod common;

use common::{read_pid, wait_until_gone, wait_until_slot_free, write_pid_script, TestServerBuilder};
use std::time::Duration;

#[tokio::test]
async fn test_disconnect_during_silence_kills_reload_script() {
    let builder = TestServerBuilder::new().unwrap();
    let pid_file = builder.temp_path().join("reload.pid");
    let script =
        write_pid_script(builder.temp_path(), &pid_file, "echo a\nsleep 30\necho b").unwrap();

    let server = builder
        .with_reload_script(script.to_string_lossy())
        .with_real_processes()
        .build()
        .await
        .unwrap();

    let mut response = server.client.get(server.url("/reload")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let first = response.chunk().await.unwrap().unwrap();
    assert_eq!(&first[..], b"a\n");

    let pid = read_pid(&pid_file).unwrap();
    drop(response);

    assert!(
        wait_until_gone(pid, Duration::from_secs(5)).await,
        "reload script {pid} outlived a silent disconnect"
    );
    assert!(
        wait_until_slot_free(&server.state, Duration::from_secs(5)).await,
        "reload slot was never released"
    );
}
