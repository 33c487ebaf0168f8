use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::features::uploads::handlers::{
    cancel_upload, finalize_upload, get_upload_status, initialize_upload, upload_chunk,
};
use crate::features::uploads::services::UploadService;
use crate::shared::constants::CHUNK_BODY_OVERHEAD;

/// Create routes for the uploads feature
pub fn routes(upload_service: Arc<UploadService>) -> Router {
    let chunk_body_limit = upload_service.max_chunk_size() as usize + CHUNK_BODY_OVERHEAD;

    Router::new()
        .route("/api/uploads/init", post(initialize_upload))
        .route(
            "/api/uploads/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(chunk_body_limit)),
        )
        .route("/api/uploads/finalize", post(finalize_upload))
        .route(
            "/api/uploads/{upload_id}",
            get(get_upload_status).delete(cancel_upload),
        )
        .with_state(upload_service)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::{TestResponse, TestServer};
    use serde_json::{json, Value};
    use sha2::{Digest, Sha256};

    use crate::features::uploads::models::UploadStatus;
    use crate::modules::storage::MemoryChunkStore;
    use crate::shared::test_helpers::{
        sample_bytes, spawn_server, test_app, test_app_with, TestApp,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const MIB: u64 = 1024 * 1024;

    fn server(app: &TestApp) -> TestServer {
        TestServer::new(app.router.clone()).unwrap()
    }

    async fn init(server: &TestServer, body: Value) -> TestResponse {
        server.post("/api/uploads/init").json(&body).await
    }

    async fn init_ok(server: &TestServer, file_size: u64, chunk_size: Option<u64>) -> Value {
        let response = init(
            server,
            json!({
                "filename": "claim-form.pdf",
                "fileSize": file_size,
                "mimeType": "application/pdf",
                "chunkSize": chunk_size,
            }),
        )
        .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()["data"].clone()
    }

    async fn send_chunk(
        server: &TestServer,
        upload_id: &str,
        index: u32,
        start: u64,
        end: u64,
        bytes: &[u8],
    ) -> TestResponse {
        let form = MultipartForm::new()
            .add_text("uploadId", upload_id)
            .add_text("chunkIndex", index)
            .add_text("start", start)
            .add_text("end", end)
            .add_part(
                "chunk",
                Part::bytes(bytes.to_vec())
                    .file_name(format!("chunk-{}", index))
                    .mime_type("application/octet-stream"),
            );
        server.post("/api/uploads/chunk").multipart(form).await
    }

    /// Send chunk `index` of `data` using the session's chunk size
    async fn send_slice(
        server: &TestServer,
        upload_id: &str,
        chunk_size: u64,
        index: u32,
        data: &[u8],
    ) -> TestResponse {
        let start = index as u64 * chunk_size;
        let end = (start + chunk_size).min(data.len() as u64);
        send_chunk(
            server,
            upload_id,
            index,
            start,
            end,
            &data[start as usize..end as usize],
        )
        .await
    }

    async fn finalize(server: &TestServer, upload_id: &str) -> TestResponse {
        server
            .post("/api/uploads/finalize")
            .json(&json!({ "uploadId": upload_id }))
            .await
    }

    async fn status(server: &TestServer, upload_id: &str) -> Value {
        let response = server.get(&format!("/api/uploads/{}", upload_id)).await;
        response.assert_status_ok();
        response.json::<Value>()["data"].clone()
    }

    #[tokio::test]
    async fn test_evenly_divided_upload_in_order() {
        let app = test_app();
        let server = server(&app);
        let data = sample_bytes((15 * MIB) as usize);

        let session = init_ok(&server, 15 * MIB, None).await;
        assert_eq!(session["totalChunks"], 3);
        assert_eq!(session["chunkSize"], 5 * MIB);
        assert_eq!(session["status"], "initialized");
        assert_eq!(session["resumable"], true);
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        for index in 0..3 {
            let response = send_slice(&server, &upload_id, 5 * MIB, index, &data).await;
            response.assert_status_ok();
            let receipt = response.json::<Value>()["data"].clone();
            assert_eq!(receipt["received"], 5 * MIB);
            assert_eq!(receipt["receivedChunks"], index + 1);
            assert_eq!(receipt["isComplete"], index == 2);
        }

        let response = finalize(&server, &upload_id).await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["message"], "Upload completed");
        assert_eq!(body["data"]["size"], 15 * MIB);
        assert_eq!(body["data"]["checksum"], hex::encode(Sha256::digest(&data)));

        let location = body["data"]["location"].as_str().unwrap();
        assert_eq!(std::fs::metadata(location).unwrap().len(), 15 * MIB);

        let state = status(&server, &upload_id).await;
        assert_eq!(state["status"], "completed");
        assert_eq!(state["progressPercent"], 100.0);
    }

    #[tokio::test]
    async fn test_out_of_order_upload_reconstructs_tail() {
        let app = test_app();
        let server = server(&app);
        let data = sample_bytes(12_000_000);

        let session = init_ok(&server, 12_000_000, Some(5_000_000)).await;
        assert_eq!(session["totalChunks"], 3);
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        let last = send_slice(&server, &upload_id, 5_000_000, 2, &data).await;
        last.assert_status_ok();
        assert_eq!(last.json::<Value>()["data"]["received"], 2_000_000);

        for index in [0, 1] {
            send_slice(&server, &upload_id, 5_000_000, index, &data)
                .await
                .assert_status_ok();
        }

        let response = finalize(&server, &upload_id).await;
        response.assert_status_ok();
        let location = response.json::<Value>()["data"]["location"]
            .as_str()
            .unwrap()
            .to_string();

        let assembled = std::fs::read(location).unwrap();
        assert_eq!(assembled.len(), 12_000_000);
        assert_eq!(&assembled[10_000_000..], &data[10_000_000..]);
        assert_eq!(assembled, data);
    }

    #[tokio::test]
    async fn test_out_of_bounds_index_leaves_session_untouched() {
        let app = test_app();
        let server = server(&app);
        let session = init_ok(&server, 3000, Some(1024)).await;
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        let response = send_chunk(&server, &upload_id, 5, 5120, 6144, &[0u8; 1024]).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["code"], "VALIDATION_ERROR");

        let state = status(&server, &upload_id).await;
        assert_eq!(state["status"], "initialized");
        assert_eq!(state["receivedChunks"], json!([]));
        assert_eq!(state["missingChunks"], json!([0, 1, 2]));
    }

    #[tokio::test]
    async fn test_finalize_incomplete_upload_names_missing_chunk() {
        let app = test_app();
        let server = server(&app);
        let data = sample_bytes(3000);
        let session = init_ok(&server, 3000, Some(1024)).await;
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        for index in [0, 1] {
            send_slice(&server, &upload_id, 1024, index, &data)
                .await
                .assert_status_ok();
        }

        let response = finalize(&server, &upload_id).await;
        response.assert_status(StatusCode::CONFLICT);
        let body = response.json::<Value>();
        assert_eq!(body["code"], "INCOMPLETE_UPLOAD");
        assert_eq!(body["errors"], json!(["missing chunk 2"]));

        let state = status(&server, &upload_id).await;
        assert_eq!(state["status"], "in_progress");
        assert_eq!(state["missingChunks"], json!([2]));
    }

    #[tokio::test]
    async fn test_cancel_blocks_chunks_and_is_idempotent() {
        let app = test_app();
        let server = server(&app);
        let data = sample_bytes(3000);
        let session = init_ok(&server, 3000, Some(1024)).await;
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        send_slice(&server, &upload_id, 1024, 0, &data)
            .await
            .assert_status_ok();

        let response = server.delete(&format!("/api/uploads/{}", upload_id)).await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["message"], "Upload cancelled");
        assert_eq!(body["data"]["status"], "cancelled");

        let response = send_slice(&server, &upload_id, 1024, 1, &data).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["code"], "INVALID_STATE");

        server
            .delete(&format!("/api/uploads/{}", upload_id))
            .await
            .assert_status_ok();

        let response = finalize(&server, &upload_id).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(status(&server, &upload_id).await["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_counted_once() {
        let app = test_app();
        let server = server(&app);
        let data = sample_bytes(2048);
        let session = init_ok(&server, 2048, Some(1024)).await;
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        for _ in 0..3 {
            let response = send_slice(&server, &upload_id, 1024, 0, &data).await;
            response.assert_status_ok();
            assert_eq!(response.json::<Value>()["data"]["receivedChunks"], 1);
        }

        let state = status(&server, &upload_id).await;
        assert_eq!(state["receivedChunks"], json!([0]));
        assert_eq!(state["progressPercent"], 50.0);
    }

    #[tokio::test]
    async fn test_chunk_size_and_range_checks() {
        let app = test_app();
        let server = server(&app);
        let session = init_ok(&server, 3000, Some(1024)).await;
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        // Short non-final chunk
        let response = send_chunk(&server, &upload_id, 0, 0, 1000, &[1u8; 1000]).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        // Declared range disagrees with the payload
        let response = send_chunk(&server, &upload_id, 0, 0, 1024, &[1u8; 1000]).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        // Final chunk running past the declared size
        let response = send_chunk(&server, &upload_id, 2, 2048, 3072, &[1u8; 1024]).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        // Missing form field
        let form = MultipartForm::new()
            .add_text("uploadId", &upload_id)
            .add_text("chunkIndex", 0);
        let response = server.post("/api/uploads/chunk").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        assert_eq!(status(&server, &upload_id).await["receivedChunks"], json!([]));
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_requests() {
        let app = test_app();
        let server = server(&app);

        let response = init(
            &server,
            json!({ "filename": "a.exe", "fileSize": 10, "mimeType": "application/x-msdownload" }),
        )
        .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["code"], "VALIDATION_ERROR");

        let response = init(
            &server,
            json!({ "filename": "a.pdf", "fileSize": 0, "mimeType": "application/pdf" }),
        )
        .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = init(
            &server,
            json!({ "filename": "a.pdf", "fileSize": 600 * MIB, "mimeType": "application/pdf" }),
        )
        .await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);

        let response = init(&server, json!({ "filename": "a.pdf" })).await;
        assert!(response.status_code().is_client_error());
    }

    #[tokio::test]
    async fn test_initialize_strips_path_components() {
        let app = test_app();
        let server = server(&app);

        let response = init(
            &server,
            json!({
                "filename": "../../etc/claim.pdf",
                "fileSize": 10,
                "mimeType": "Application/PDF"
            }),
        )
        .await;
        response.assert_status(StatusCode::CREATED);
        let session = response.json::<Value>()["data"].clone();
        assert_eq!(session["filename"], "claim.pdf");

        let upload_id = session["uploadId"].as_str().unwrap();
        let state = status(&server, upload_id).await;
        assert_eq!(state["mimeType"], "application/pdf");
    }

    #[tokio::test]
    async fn test_unknown_upload_is_not_found() {
        let app = test_app();
        let server = server(&app);
        let missing = uuid::Uuid::new_v4().to_string();

        let response = server.get(&format!("/api/uploads/{}", missing)).await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["status"], "error");

        send_chunk(&server, &missing, 0, 0, 4, b"data")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        finalize(&server, &missing)
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete(&format!("/api/uploads/{}", missing))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_finalize_with_filename_override() {
        let app = test_app();
        let server = server(&app);
        let data = sample_bytes(10);
        let session = init_ok(&server, 10, Some(1024)).await;
        let upload_id = session["uploadId"].as_str().unwrap().to_string();

        send_chunk(&server, &upload_id, 0, 0, 10, &data)
            .await
            .assert_status_ok();

        let response = server
            .post("/api/uploads/finalize")
            .json(&json!({ "uploadId": upload_id, "filename": "renamed.pdf" }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["data"]["filename"], "renamed.pdf");

        let session = app
            .registry
            .get_session(upload_id.parse().unwrap())
            .await
            .unwrap();
        assert_eq!(session.status, UploadStatus::Completed);
        assert!(session.final_location.is_some());
        assert!(app.files_dir.exists());

        finalize(&server, &upload_id)
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_malformed_upload_id_uses_error_envelope() {
        let app = test_app();
        let server = server(&app);

        for response in [
            server.get("/api/uploads/not-a-uuid").await,
            server.delete("/api/uploads/not-a-uuid").await,
        ] {
            response.assert_status(StatusCode::BAD_REQUEST);
            let body = response.json::<Value>();
            assert_eq!(body["status"], "error");
            assert_eq!(body["code"], "VALIDATION_ERROR");
        }
    }

    #[tokio::test]
    async fn test_stalled_chunk_body_times_out() {
        let app = test_app_with(Arc::new(MemoryChunkStore::new()), |config| {
            config.chunk_read_timeout = Duration::from_millis(200);
        });
        let base = spawn_server(app.router.clone()).await;
        let addr = base.trim_start_matches("http://");

        // Announce a 1 KiB body, send only the first field, then go quiet
        let boundary = "chunkboundary";
        let partial = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"chunkIndex\"\r\n\r\n0\r\n",
            b = boundary
        );
        let head = format!(
            "POST /api/uploads/chunk HTTP/1.1\r\nHost: {}\r\n\
             Content-Type: multipart/form-data; boundary={}\r\n\
             Content-Length: 1024\r\n\r\n",
            addr, boundary
        );

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(partial.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        tokio::time::timeout(Duration::from_secs(5), async {
            while !response.windows(2).any(|w| w == b"\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                response.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .expect("server answered a stalled body");

        let status_line = String::from_utf8_lossy(&response);
        assert!(
            status_line.starts_with("HTTP/1.1 504"),
            "unexpected response: {}",
            status_line
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        server(&app).get("/health").await.assert_status_ok();
    }
}
