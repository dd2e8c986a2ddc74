use tracing::info;

pub fn log_stream_begin(request_id: &str, message_len: usize, use_orchestrator: bool) {
    info!(
        "[STREAM] begin: request={}, messageLen={}, orchestrator={}",
        request_id, message_len, use_orchestrator
    );
}

pub fn log_stream_complete(request_id: &str, elapsed_secs: f64) {
    info!(
        "[STREAM] complete: request={}, elapsed={:.2}s",
        request_id, elapsed_secs
    );
}
