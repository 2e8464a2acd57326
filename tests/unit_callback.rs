use std::io::Write;
use std::time::Duration;
use xlsm_fix::FixError;
use xlsm_fix::callback::{CallbackListener, RETURN_MESSAGE};

#[tokio::test(flavor = "current_thread")]
async fn first_redirect_is_captured_and_answered() {
    let listener = CallbackListener::bind("127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("bind");
    let port = listener.local_addr().port();
    assert_ne!(port, 0);

    let browser = tokio::spawn(async move {
        let response = reqwest::get(format!(
            "http://127.0.0.1:{port}/?code=abc&state=xyz&session_state=s1"
        ))
        .await
        .expect("redirect");
        (response.status(), response.text().await.expect("body"))
    });

    let params = listener
        .wait(Duration::from_secs(10))
        .await
        .expect("redirect params");
    assert_eq!(params.code(), Some("abc"));
    assert_eq!(params.state(), Some("xyz"));
    assert_eq!(params.get("session_state"), Some("s1"));

    let (status, body) = browser.await.expect("browser task");
    assert!(status.is_success());
    assert_eq!(body, RETURN_MESSAGE);
}

#[tokio::test(flavor = "current_thread")]
async fn redirect_path_does_not_matter() {
    let listener = CallbackListener::bind("127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("bind");
    let port = listener.local_addr().port();

    tokio::spawn(async move {
        let _ = reqwest::get(format!(
            "http://127.0.0.1:{port}/auth/callback?error=access_denied&error_description=nope"
        ))
        .await;
    });

    let params = listener.wait(Duration::from_secs(10)).await.expect("params");
    assert_eq!(params.error(), Some("access_denied"));
    assert_eq!(params.error_description(), Some("nope"));
    assert_eq!(params.code(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn silence_times_out() {
    let listener = CallbackListener::bind("127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("bind");
    let err = listener
        .wait(Duration::from_millis(100))
        .await
        .expect_err("timeout");
    assert!(matches!(err, FixError::CallbackTimeout(d) if d == Duration::from_millis(100)));
}

#[tokio::test(flavor = "current_thread")]
async fn occupied_port_is_a_bind_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("occupy");
    let addr = occupied.local_addr().expect("addr");
    let err = CallbackListener::bind(addr).await.err().expect("bind error");
    assert!(matches!(err, FixError::CallbackBind { addr: a, .. } if a == addr));
    assert!(err.to_string().contains(&addr.port().to_string()));
}

#[tokio::test(flavor = "current_thread")]
async fn port_is_released_even_when_a_connection_stalls() {
    let listener = CallbackListener::bind("127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("bind");
    let addr = listener.local_addr();

    // A half-sent request keeps its connection busy through graceful shutdown.
    let mut stalled = std::net::TcpStream::connect(addr).expect("connect");
    stalled
        .write_all(b"GET /?stalled=1 HTTP/1.1\r\nHost: localhost\r\n")
        .expect("partial request");

    tokio::spawn(async move {
        let _ = reqwest::get(format!("http://{addr}/?code=abc&state=xyz")).await;
    });

    let params = listener.wait(Duration::from_secs(10)).await.expect("params");
    assert_eq!(params.code(), Some("abc"));

    let rebound = CallbackListener::bind(addr).await.expect("port released");
    assert_eq!(rebound.local_addr(), addr);
    drop(stalled);
}
