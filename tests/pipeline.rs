mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{
    Call, DownloadScript, FakeBackend, FakeMessenger, build_pipeline, dir_is_empty,
    pipeline_config,
};
use vidrelay::cancel::FlagOutcome;
use vidrelay::error::TransferError;
use vidrelay::messenger::MessageRef;
use vidrelay::pipeline::TransferOutcome;
use vidrelay::transfer::TransferRequest;

fn request(requester: i64) -> TransferRequest {
    TransferRequest {
        source_url: "https://video.example/watch?v=1".into(),
        title: "Sample clip".into(),
        duration_secs: 125,
        thumbnail_url: Some("https://img.example/thumb.jpg".into()),
        requester,
        origin_message_id: 1,
    }
}

fn status(requester: i64) -> MessageRef {
    MessageRef::new(requester, 1_000)
}

#[tokio::test]
async fn delivers_video_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        3,
        backend,
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let submitted = pipeline.submit(request(1), status(1)).unwrap();
    assert_eq!(submitted.outcome().await, TransferOutcome::Delivered);

    let videos = messenger.videos();
    assert_eq!(videos.len(), 1);
    let Call::SendVideo {
        chat,
        caption,
        thumbnail,
        size,
        ..
    } = &videos[0]
    else {
        unreachable!()
    };
    assert_eq!(*chat, 1);
    assert_eq!(*size, 4096);
    assert!(caption.contains("Sample clip"));
    assert!(!caption.contains("deleted in"));
    assert!(thumbnail.is_some());

    let edits = messenger.edits_of(status(1));
    assert!(edits.iter().any(|text| text.contains("Download complete!")));
    assert!(messenger.calls().contains(&Call::Delete(status(1))));

    assert!(dir_is_empty(dir.path()));
    assert_eq!(pipeline.slots().active_count(), 0);
}

#[tokio::test]
async fn rejects_when_all_slots_are_busy() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::holding());
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        3,
        Arc::clone(&backend),
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let running: Vec<_> = (1..=3)
        .map(|user| pipeline.submit(request(user), status(user)).unwrap())
        .collect();
    for _ in 0..3 {
        backend.wait_started().await;
    }

    let rejected = pipeline.submit(request(4), status(4)).unwrap_err();
    assert_eq!(rejected, TransferError::AdmissionRejected { max: 3 });
    assert_eq!(pipeline.slots().active_count(), 3);
    assert!(messenger.edits_of(status(4)).is_empty());

    backend.release.add_permits(3);
    for transfer in running {
        assert_eq!(transfer.outcome().await, TransferOutcome::Delivered);
    }
    assert_eq!(pipeline.slots().active_count(), 0);
    assert!(pipeline.submit(request(4), status(4)).is_ok());
}

#[tokio::test]
async fn download_failure_reports_sanitized_line() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::scripted(DownloadScript::Fail(
        "WARNING: retrying\nERROR: HTTP Error 403: Forbidden\n".into(),
    )));
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        3,
        backend,
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let outcome = pipeline.submit(request(1), status(1)).unwrap().outcome().await;
    assert!(matches!(
        outcome,
        TransferOutcome::Failed(TransferError::TransferFailed(_))
    ));

    let last_edit = messenger.edits_of(status(1)).pop().unwrap();
    assert!(last_edit.contains("An Error Occurred"));
    assert!(last_edit.contains("<code>HTTP Error 403: Forbidden</code>"));
    assert!(messenger.videos().is_empty());
    assert!(dir_is_empty(dir.path()));
    assert_eq!(pipeline.slots().active_count(), 0);
}

#[tokio::test]
async fn missing_output_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::scripted(DownloadScript::NoFile));
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        1,
        backend,
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let outcome = pipeline.submit(request(1), status(1)).unwrap().outcome().await;
    assert_eq!(outcome, TransferOutcome::Failed(TransferError::OutputMissing));
    let last_edit = messenger.edits_of(status(1)).pop().unwrap();
    assert!(last_edit.contains("Downloaded file not found."));
    assert_eq!(pipeline.slots().active_count(), 0);
}

#[tokio::test]
async fn cancelled_download_never_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::holding());
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        3,
        Arc::clone(&backend),
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let submitted = pipeline.submit(request(1), status(1)).unwrap();
    let id = submitted.id.clone();
    backend.wait_started().await;

    assert_eq!(pipeline.cancellations().flag(&id), FlagOutcome::Flagged);
    assert_eq!(submitted.outcome().await, TransferOutcome::Cancelled);

    let last_edit = messenger.edits_of(status(1)).pop().unwrap();
    assert!(last_edit.contains("Download Canceled"));
    assert!(last_edit.contains("Sample clip"));
    assert!(messenger.videos().is_empty());
    assert!(dir_is_empty(dir.path()));
    assert!(!pipeline.cancellations().is_flagged(&id));
    assert!(!pipeline.slots().is_active(&id));
}

#[tokio::test]
async fn flag_is_honored_when_download_ignores_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::holding());
    backend.ignore_cancel.store(true, Ordering::SeqCst);
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        3,
        Arc::clone(&backend),
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let submitted = pipeline.submit(request(1), status(1)).unwrap();
    let id = submitted.id.clone();
    backend.wait_started().await;

    assert_eq!(pipeline.cancellations().flag(&id), FlagOutcome::Flagged);
    backend.release.add_permits(1);
    assert_eq!(submitted.outcome().await, TransferOutcome::Cancelled);

    assert!(messenger.videos().is_empty());
    assert!(dir_is_empty(dir.path()));
    assert_eq!(pipeline.slots().active_count(), 0);
    assert!(!pipeline.cancellations().is_flagged(&id));
}

#[tokio::test]
async fn status_edit_failures_do_not_abort_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = Arc::new(FakeMessenger::default());
    messenger.fail_edits.store(true, Ordering::SeqCst);
    let pipeline = build_pipeline(
        1,
        Arc::new(FakeBackend::default()),
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let outcome = pipeline.submit(request(1), status(1)).unwrap().outcome().await;
    assert_eq!(outcome, TransferOutcome::Delivered);

    assert_eq!(messenger.videos().len(), 1);
    assert!(messenger.edits_of(status(1)).is_empty());
    assert!(messenger.edit_attempts() > 0);
    assert!(dir_is_empty(dir.path()));
    assert_eq!(pipeline.slots().active_count(), 0);
}

#[tokio::test]
async fn flag_after_finish_is_not_active() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = build_pipeline(
        1,
        Arc::new(FakeBackend::default()),
        Arc::new(FakeMessenger::default()),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let submitted = pipeline.submit(request(1), status(1)).unwrap();
    let id = submitted.id.clone();
    assert_eq!(submitted.outcome().await, TransferOutcome::Delivered);
    assert_eq!(pipeline.cancellations().flag(&id), FlagOutcome::NotActive);
}

#[tokio::test]
async fn upload_failure_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = Arc::new(FakeMessenger::default());
    messenger.fail_upload.store(true, Ordering::SeqCst);
    let pipeline = build_pipeline(
        1,
        Arc::new(FakeBackend::default()),
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let outcome = pipeline.submit(request(1), status(1)).unwrap().outcome().await;
    assert!(matches!(outcome, TransferOutcome::Failed(_)));
    assert!(dir_is_empty(dir.path()));
    assert_eq!(pipeline.slots().active_count(), 0);
}

#[tokio::test]
async fn missing_thumbnail_still_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    backend.thumbnail_ok.store(false, Ordering::SeqCst);
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        1,
        backend,
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let outcome = pipeline.submit(request(1), status(1)).unwrap().outcome().await;
    assert_eq!(outcome, TransferOutcome::Delivered);
    assert!(matches!(
        &messenger.videos()[0],
        Call::SendVideo { thumbnail: None, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn delivered_video_self_destructs() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = Arc::new(FakeMessenger::default());
    let pipeline = build_pipeline(
        1,
        Arc::new(FakeBackend::default()),
        Arc::clone(&messenger),
        pipeline_config(dir.path(), Duration::from_secs(30)),
    );

    let outcome = pipeline.submit(request(1), status(1)).unwrap().outcome().await;
    assert_eq!(outcome, TransferOutcome::Delivered);

    let videos = messenger.videos();
    let Call::SendVideo { caption, sent, .. } = &videos[0] else {
        unreachable!()
    };
    assert!(caption.contains("deleted in 30s"));
    assert!(messenger.calls().contains(&Call::Delete(*sent)));
    assert_eq!(pipeline.slots().active_count(), 0);
}

#[tokio::test]
async fn concurrent_submissions_respect_the_cap() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::holding());
    let pipeline = build_pipeline(
        2,
        Arc::clone(&backend),
        Arc::new(FakeMessenger::default()),
        pipeline_config(dir.path(), Duration::ZERO),
    );

    let admitted: Vec<_> = (1..=10)
        .filter_map(|user| pipeline.submit(request(user), status(user)).ok())
        .collect();
    assert_eq!(admitted.len(), 2);
    assert_eq!(pipeline.slots().active_count(), 2);

    backend.release.add_permits(2);
    for transfer in admitted {
        assert_eq!(transfer.outcome().await, TransferOutcome::Delivered);
    }
    assert_eq!(pipeline.slots().active_count(), 0);
}
