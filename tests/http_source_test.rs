//! The HTTP source against a refused connection and a backend answering
//! with an error status.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use glass_brain::{
    HttpVolumeSource, LoadError, RefreshOutcome, RefreshTrigger, ViewerConfig, ViewerState,
    VolumeSource, VolumeViewer,
};

/// Base URL of a localhost port with nothing listening on it.
fn unbound_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// Answers `requests` connections with the same status line and JSON body.
fn serve(status_line: &'static str, body: &'static str, requests: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    thread::spawn(move || {
        // The client may drop the second request once the first one fails.
        for stream in listener.incoming().take(requests) {
            let Ok(mut stream) = stream else {
                continue;
            };
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&chunk[..n]),
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    base_url
}

#[tokio::test]
async fn test_refused_connection_is_a_transport_error() {
    let config = ViewerConfig::new(unbound_base_url());
    let source = HttpVolumeSource::new(&config).unwrap();
    assert!(matches!(
        source.fetch_volume(RefreshTrigger(1)).await,
        Err(LoadError::Transport(_))
    ));

    let viewer = VolumeViewer::new(source, config);
    assert_eq!(
        viewer.refresh(RefreshTrigger(1)).await,
        RefreshOutcome::Failed
    );
    let state = viewer.state();
    assert!(matches!(state, ViewerState::Failed { .. }));
    let message = state.status_message().unwrap();
    assert!(message.starts_with("Error: Request failed"), "{message}");
}

#[tokio::test]
async fn test_error_status_uses_body_message() {
    let base_url = serve(
        "404 Not Found",
        r#"{"error": "No volume for the current filter"}"#,
        2,
    );
    let config = ViewerConfig::new(base_url);
    let viewer = VolumeViewer::new(HttpVolumeSource::new(&config).unwrap(), config);

    assert_eq!(
        viewer.refresh(RefreshTrigger(9)).await,
        RefreshOutcome::Failed
    );
    assert_eq!(
        viewer.state().status_message().as_deref(),
        Some("Error: Backend returned HTTP 404: No volume for the current filter")
    );
}
