//! Per-clip ingestion: fetch, probe, extract audio, upload, chunk.
//!
//! A clip whose audio and a gap-free chunk set are already stored returns
//! immediately without touching the toolchain. Anything less is reprocessed
//! from the download step; uploads overwrite whatever a previous run left.

use crate::config::PipelineConfig;
use crate::domain::metadata::UploadContext;
use crate::domain::processing::{chunk_count, needs_chunking};
use crate::domain::{
    BatchSummary, ClipBatch, ClipId, ClipProcessingResult, PipelineStage, ProcessingStatusSnapshot,
};
use crate::ports::storage::ObjectStore;
use crate::ports::toolchain::MediaToolchain;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const AUDIO_CONTENT_TYPE: &str = "audio/wav";
const CHUNK_LIST_PAGE: usize = 1000;
const CHUNK_LIST_MAX_PAGES: usize = 10;

pub struct IngestionPipeline<S: ?Sized, M: ?Sized> {
    store: Arc<S>,
    toolchain: Arc<M>,
    config: PipelineConfig,
}

impl<S, M> IngestionPipeline<S, M>
where
    S: ObjectStore + ?Sized,
    M: MediaToolchain + ?Sized,
{
    pub fn new(store: Arc<S>, toolchain: Arc<M>, config: PipelineConfig) -> Self {
        Self {
            store,
            toolchain,
            config,
        }
    }

    pub fn toolchain(&self) -> &M {
        &self.toolchain
    }

    /// Runs the batch one clip at a time. A failing clip never stops the rest.
    pub async fn process_batch(&self, batch: &ClipBatch) -> BatchSummary {
        let mut results = Vec::with_capacity(batch.len());
        for clip_id in batch.ids() {
            results.push(self.process_clip(clip_id).await);
        }
        let summary = BatchSummary::from_results(results);
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "batch finished"
        );
        summary
    }

    /// Probes the store for what a previous run produced. Probe errors are
    /// logged and read as "absent", which at worst causes a reprocess.
    pub async fn check_existing(&self, clip_id: &ClipId) -> ProcessingStatusSnapshot {
        let video_key = clip_id.video_key();
        let audio_key = clip_id.audio_key();
        let (video, audio, chunks) = tokio::join!(
            self.store.exists(&video_key),
            self.store.exists(&audio_key),
            self.list_chunks(clip_id),
        );

        let video_exists = video.unwrap_or_else(|e| {
            warn!(stage = %PipelineStage::CheckExisting, clip_id = %clip_id, key = %video_key, error = %e, "existence probe failed");
            false
        });
        let audio_exists = audio.unwrap_or_else(|e| {
            warn!(stage = %PipelineStage::CheckExisting, clip_id = %clip_id, key = %audio_key, error = %e, "existence probe failed");
            false
        });

        ProcessingStatusSnapshot {
            video_exists,
            audio_exists,
            chunk_keys: chunks,
        }
    }

    async fn list_chunks(&self, clip_id: &ClipId) -> Vec<String> {
        let prefix = clip_id.chunk_prefix();
        let mut keys = Vec::new();
        let mut cursor = None;
        for _ in 0..CHUNK_LIST_MAX_PAGES {
            match self.store.list(&prefix, CHUNK_LIST_PAGE, cursor.take()).await {
                Ok(page) => {
                    keys.extend(page.keys);
                    if !page.truncated || page.cursor.is_none() {
                        break;
                    }
                    cursor = page.cursor;
                }
                Err(e) => {
                    warn!(stage = %PipelineStage::CheckExisting, clip_id = %clip_id, error = %e, "chunk listing failed");
                    break;
                }
            }
        }
        keys
    }

    /// Never panics and never returns an error; every failure is folded
    /// into the result with the stage that caused it.
    #[instrument(skip_all, fields(clip_id = %clip_id))]
    pub async fn process_clip(&self, clip_id: &ClipId) -> ClipProcessingResult {
        let snapshot = self.check_existing(clip_id).await;
        if snapshot.is_complete() {
            info!(chunks = snapshot.chunk_keys.len(), "clip already processed, skipping");
            let mut result = ClipProcessingResult::new(clip_id);
            result.files_uploaded = snapshot.existing_keys(clip_id);
            result.needs_chunking = snapshot.chunking_performed();
            return result.succeed();
        }
        if snapshot.has_partial_files() {
            info!(
                video = snapshot.video_exists,
                audio = snapshot.audio_exists,
                chunks = snapshot.chunk_keys.len(),
                "partial output found, reprocessing"
            );
        }

        let workdir = match tempfile::Builder::new().prefix("clipaudio-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return ClipProcessingResult::new(clip_id)
                    .fail(PipelineStage::Download, format!("workspace: {}", e))
            }
        };
        let result = self.run(clip_id, workdir.path()).await;
        if let Err(e) = workdir.close() {
            warn!(error = %e, "failed to remove working directory");
        }

        if result.success {
            info!(files = result.files_uploaded.len(), "clip processed");
        } else {
            warn!(
                partial = result.partial_success,
                error = result.error.as_deref().unwrap_or_default(),
                "clip processing failed"
            );
        }
        result
    }

    async fn run(&self, clip_id: &ClipId, workdir: &Path) -> ClipProcessingResult {
        let mut result = ClipProcessingResult::new(clip_id);

        let video = match self.toolchain.fetch_clip(clip_id, workdir).await {
            Ok(path) => path,
            Err(e) => return result.fail(PipelineStage::Download, e),
        };

        let duration = self.probe(&video).await;
        result.duration = duration;

        let audio = workdir.join(format!("{}.wav", clip_id));
        if let Err(e) = self
            .toolchain
            .extract_audio(&video, &audio, self.config.sample_rate, self.config.channels)
            .await
        {
            return result.fail(PipelineStage::ExtractAudio, e);
        }

        let context = UploadContext {
            clip_id,
            source: &self.config.source_tag,
            created_at: Utc::now(),
            duration,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        };

        let video_key = clip_id.video_key();
        if let Err(e) = self
            .store
            .put_file(&video_key, &video, VIDEO_CONTENT_TYPE, context.whole_file())
            .await
        {
            return result.fail(PipelineStage::UploadVideo, e);
        }
        result.files_uploaded.push(video_key);

        let audio_key = clip_id.audio_key();
        if let Err(e) = self
            .store
            .put_file(&audio_key, &audio, AUDIO_CONTENT_TYPE, context.whole_file())
            .await
        {
            // The video stays in place; a retry overwrites it.
            return result.partial(PipelineStage::UploadAudio, e);
        }
        result.files_uploaded.push(audio_key);

        if !needs_chunking(duration, self.config.max_clip_duration) {
            return result.succeed();
        }
        result.needs_chunking = true;

        let total_chunks = duration
            .map(|d| chunk_count(d, self.config.chunk_duration))
            .unwrap_or(0);
        let chunks = self.build_chunks(&audio, workdir, total_chunks).await;
        if chunks.is_empty() {
            warn!(expected = total_chunks, "no usable chunks produced, keeping whole audio only");
            result.needs_chunking = false;
            return result.succeed();
        }

        let mut uploaded = Vec::with_capacity(chunks.len());
        for (index, path) in &chunks {
            let key = clip_id.chunk_key(*index);
            match self
                .store
                .put_file(&key, path, AUDIO_CONTENT_TYPE, context.chunk(*index, total_chunks))
                .await
            {
                Ok(()) => uploaded.push(key),
                Err(e) => {
                    self.roll_back(&uploaded).await;
                    return result.partial(
                        PipelineStage::UploadChunks,
                        format!("chunk {} of {}: {}", index, total_chunks, e),
                    );
                }
            }
        }
        debug!(chunks = uploaded.len(), "chunks uploaded");
        result.files_uploaded.extend(uploaded);
        result.succeed()
    }

    /// Probe failures and unusable values both mean "duration unknown".
    async fn probe(&self, video: &Path) -> Option<f64> {
        match self.toolchain.probe_duration(video).await {
            Ok(Some(d)) if d.is_finite() && d > 0.0 => Some(d),
            Ok(other) => {
                warn!(stage = %PipelineStage::ProbeDuration, duration = ?other, "no usable duration, chunking disabled");
                None
            }
            Err(e) => {
                warn!(stage = %PipelineStage::ProbeDuration, error = %e, "duration probe failed, chunking disabled");
                None
            }
        }
    }

    /// Splits the audio and keeps only segments that exist and are non-empty,
    /// each paired with its original index.
    async fn build_chunks(&self, audio: &Path, workdir: &Path, count: usize) -> Vec<(usize, PathBuf)> {
        if count == 0 {
            return Vec::new();
        }
        let out_dir = workdir.join("chunks");
        if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
            warn!(stage = %PipelineStage::BuildChunks, error = %e, "cannot create chunk directory");
            return Vec::new();
        }
        let paths = match self
            .toolchain
            .split_audio(audio, &out_dir, self.config.chunk_duration, count)
            .await
        {
            Ok(paths) => paths,
            Err(e) => {
                warn!(stage = %PipelineStage::BuildChunks, error = %e, "audio split failed");
                return Vec::new();
            }
        };

        let mut valid = Vec::with_capacity(paths.len());
        for (index, path) in paths.into_iter().enumerate() {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.len() > 0 => valid.push((index, path)),
                Ok(_) => warn!(index, "dropping empty chunk"),
                Err(_) => warn!(index, "dropping missing chunk"),
            }
        }
        valid
    }

    async fn roll_back(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.store.delete(key).await {
                warn!(key = %key, error = %e, "failed to roll back chunk upload");
            }
        }
        if !keys.is_empty() {
            info!(removed = keys.len(), "rolled back chunk uploads");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::storage::{ListPage, MockObjectStore, StorageError};
    use crate::ports::toolchain::{MockMediaToolchain, ToolchainError};
    use mockall::predicate::eq;
    use parking_lot::Mutex;

    fn clip(raw: &str) -> ClipId {
        ClipId::parse(raw).unwrap()
    }

    fn pipeline(
        store: MockObjectStore,
        toolchain: MockMediaToolchain,
    ) -> IngestionPipeline<MockObjectStore, MockMediaToolchain> {
        IngestionPipeline::new(Arc::new(store), Arc::new(toolchain), PipelineConfig::default())
    }

    /// A store that holds nothing for any clip.
    fn empty_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_exists().returning(|_| Ok(false));
        store.expect_list().returning(|_, _, _| Ok(ListPage::default()));
        store
    }

    /// A toolchain that writes real files for fetch and extract and reports
    /// `duration` from the probe.
    fn working_toolchain(duration: Option<f64>) -> MockMediaToolchain {
        let mut toolchain = MockMediaToolchain::new();
        toolchain.expect_fetch_clip().returning(|id, dir| {
            let path = dir.join(format!("{}.mp4", id));
            std::fs::write(&path, b"video").unwrap();
            Ok(path)
        });
        toolchain
            .expect_probe_duration()
            .returning(move |_| Ok(duration));
        toolchain.expect_extract_audio().returning(|_, dst, _, _| {
            std::fs::write(dst, b"RIFF").unwrap();
            Ok(())
        });
        toolchain
    }

    fn split_writing(
        count_written: usize,
    ) -> impl Fn(&Path, &Path, u32, usize) -> Result<Vec<PathBuf>, ToolchainError> + Send + 'static {
        move |_, out_dir, _, count| {
            Ok((0..count)
                .map(|i| {
                    let path = out_dir.join(format!("{:03}.wav", i));
                    if i < count_written {
                        std::fs::write(&path, b"chunk").unwrap();
                    }
                    path
                })
                .collect())
        }
    }

    fn recording_puts(store: &mut MockObjectStore) -> Arc<Mutex<Vec<String>>> {
        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = keys.clone();
        store.expect_put_file().returning(move |key, _, _, _| {
            sink.lock().push(key.to_string());
            Ok(())
        });
        keys
    }

    #[tokio::test]
    async fn complete_clip_short_circuits() {
        let id = clip("done");
        let mut store = MockObjectStore::new();
        store.expect_exists().returning(|_| Ok(true));
        let chunk_keys: Vec<String> = (0..3).map(|i| id.chunk_key(i)).collect();
        let listed = chunk_keys.clone();
        store.expect_list().returning(move |_, _, _| {
            Ok(ListPage {
                keys: listed.clone(),
                cursor: None,
                truncated: false,
            })
        });
        // No toolchain expectations: any call fails the test.
        let result = pipeline(store, MockMediaToolchain::new()).process_clip(&id).await;

        assert!(result.success);
        assert!(result.needs_chunking);
        assert_eq!(result.files_uploaded.len(), 5);
        assert_eq!(result.files_uploaded[0], id.video_key());
        assert_eq!(&result.files_uploaded[2..], &chunk_keys[..]);
    }

    #[tokio::test]
    async fn short_clip_uploads_video_and_audio() {
        let id = clip("short");
        let mut store = empty_store();
        let puts = recording_puts(&mut store);
        let result = pipeline(store, working_toolchain(Some(120.0)))
            .process_clip(&id)
            .await;

        assert!(result.success);
        assert!(!result.needs_chunking);
        assert_eq!(result.duration, Some(120.0));
        assert_eq!(result.files_uploaded, vec![id.video_key(), id.audio_key()]);
        assert_eq!(*puts.lock(), result.files_uploaded);
    }

    #[tokio::test]
    async fn long_clip_is_chunked() {
        let id = clip("long");
        let mut store = empty_store();
        let puts = recording_puts(&mut store);
        let mut toolchain = working_toolchain(Some(400.0));
        toolchain
            .expect_split_audio()
            .withf(|_, _, secs, count| *secs == 90 && *count == 5)
            .times(1)
            .returning(split_writing(5));

        let result = pipeline(store, toolchain).process_clip(&id).await;

        assert!(result.success);
        assert!(result.needs_chunking);
        assert_eq!(result.files_uploaded.len(), 7);
        assert_eq!(result.files_uploaded[2], "audio/long/chunk_000.wav");
        assert_eq!(result.files_uploaded[6], "audio/long/chunk_004.wav");
        assert_eq!(puts.lock().len(), 7);
    }

    #[tokio::test]
    async fn empty_and_missing_chunks_are_dropped_keeping_indices() {
        let id = clip("gappy");
        let mut store = empty_store();
        let puts = recording_puts(&mut store);
        let mut toolchain = working_toolchain(Some(400.0));
        toolchain.expect_split_audio().returning(|_, out_dir, _, count| {
            let paths: Vec<PathBuf> = (0..count).map(|i| out_dir.join(format!("{:03}.wav", i))).collect();
            std::fs::write(&paths[0], b"a").unwrap();
            std::fs::write(&paths[1], b"b").unwrap();
            std::fs::write(&paths[2], b"").unwrap();
            std::fs::write(&paths[3], b"d").unwrap();
            Ok(paths)
        });

        let result = pipeline(store, toolchain).process_clip(&id).await;

        assert!(result.success);
        assert_eq!(puts.lock().len(), 5);
        assert_eq!(
            &result.files_uploaded[2..],
            &[id.chunk_key(0), id.chunk_key(1), id.chunk_key(3)]
        );
    }

    #[tokio::test]
    async fn zero_usable_chunks_keeps_whole_audio() {
        let id = clip("nochunks");
        let mut store = empty_store();
        recording_puts(&mut store);
        let mut toolchain = working_toolchain(Some(400.0));
        toolchain.expect_split_audio().returning(split_writing(0));

        let result = pipeline(store, toolchain).process_clip(&id).await;

        assert!(result.success);
        assert!(!result.needs_chunking);
        assert_eq!(result.files_uploaded, vec![id.video_key(), id.audio_key()]);
    }

    #[tokio::test]
    async fn probe_failure_disables_chunking() {
        let id = clip("noprobe");
        let mut store = empty_store();
        recording_puts(&mut store);
        let mut toolchain = MockMediaToolchain::new();
        toolchain.expect_fetch_clip().returning(|id, dir| {
            let path = dir.join(format!("{}.mp4", id));
            std::fs::write(&path, b"video").unwrap();
            Ok(path)
        });
        toolchain.expect_probe_duration().returning(|_| {
            Err(ToolchainError::Timeout {
                tool: "ffprobe",
                secs: 30,
            })
        });
        toolchain.expect_extract_audio().returning(|_, dst, _, _| {
            std::fs::write(dst, b"RIFF").unwrap();
            Ok(())
        });

        let result = pipeline(store, toolchain).process_clip(&id).await;

        assert!(result.success);
        assert_eq!(result.duration, None);
        assert!(!result.needs_chunking);
    }

    #[tokio::test]
    async fn download_failure_uploads_nothing() {
        let id = clip("missing");
        let store = empty_store();
        let mut toolchain = MockMediaToolchain::new();
        toolchain.expect_fetch_clip().returning(|_, _| {
            Err(ToolchainError::Failed {
                tool: "yt-dlp",
                status: "exit status: 1".into(),
                stderr: "not found".into(),
            })
        });

        let result = pipeline(store, toolchain).process_clip(&id).await;

        assert!(!result.success);
        assert!(!result.partial_success);
        assert!(result.files_uploaded.is_empty());
        assert!(result.error.unwrap().starts_with("download:"));
    }

    #[tokio::test]
    async fn video_upload_failure_is_a_plain_failure() {
        let id = clip("novideo");
        let mut store = empty_store();
        store
            .expect_put_file()
            .times(1)
            .returning(|_, _, _, _| Err(StorageError::Backend("503".into())));

        let result = pipeline(store, working_toolchain(Some(60.0)))
            .process_clip(&id)
            .await;

        assert!(!result.success);
        assert!(!result.partial_success);
        assert!(result.files_uploaded.is_empty());
        assert!(result.error.unwrap().starts_with("upload_video:"));
    }

    #[tokio::test]
    async fn audio_upload_failure_keeps_video() {
        let id = clip("noaudio");
        let mut store = empty_store();
        store
            .expect_put_file()
            .withf(|key, _, _, _| key == "clips/noaudio.mp4")
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        store
            .expect_put_file()
            .withf(|key, _, _, _| key == "audio/noaudio.wav")
            .times(1)
            .returning(|_, _, _, _| Err(StorageError::Backend("timeout".into())));
        store.expect_delete().never();

        let result = pipeline(store, working_toolchain(Some(60.0)))
            .process_clip(&id)
            .await;

        assert!(!result.success);
        assert!(result.partial_success);
        assert_eq!(result.files_uploaded, vec![id.video_key()]);
        assert!(result.error.unwrap().starts_with("upload_audio:"));
    }

    #[tokio::test]
    async fn chunk_upload_failure_rolls_back_this_runs_chunks() {
        let id = clip("rollback");
        let mut store = empty_store();
        store
            .expect_put_file()
            .withf(|key, _, _, _| key == "audio/rollback/chunk_002.wav")
            .returning(|_, _, _, _| Err(StorageError::Backend("reset".into())));
        store
            .expect_put_file()
            .returning(|_, _, _, _| Ok(()));
        store
            .expect_delete()
            .with(eq("audio/rollback/chunk_000.wav"))
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_delete()
            .with(eq("audio/rollback/chunk_001.wav"))
            .times(1)
            .returning(|_| Ok(()));
        let mut toolchain = working_toolchain(Some(400.0));
        toolchain.expect_split_audio().returning(split_writing(5));

        let result = pipeline(store, toolchain).process_clip(&id).await;

        assert!(!result.success);
        assert!(result.partial_success);
        assert_eq!(result.files_uploaded, vec![id.video_key(), id.audio_key()]);
        assert!(result.error.unwrap().starts_with("upload_chunks:"));
    }

    #[tokio::test]
    async fn partial_output_is_reprocessed() {
        let id = clip("half");
        let mut store = MockObjectStore::new();
        store
            .expect_exists()
            .with(eq("clips/half.mp4"))
            .returning(|_| Ok(true));
        store.expect_exists().returning(|_| Ok(false));
        store.expect_list().returning(|_, _, _| Ok(ListPage::default()));
        recording_puts(&mut store);

        let result = pipeline(store, working_toolchain(Some(30.0)))
            .process_clip(&id)
            .await;

        assert!(result.success);
        assert_eq!(result.files_uploaded, vec![id.video_key(), id.audio_key()]);
    }

    #[tokio::test]
    async fn existence_probe_errors_read_as_absent() {
        let id = clip("flaky");
        let mut store = MockObjectStore::new();
        store
            .expect_exists()
            .returning(|_| Err(StorageError::Backend("down".into())));
        store
            .expect_list()
            .returning(|_, _, _| Err(StorageError::Backend("down".into())));

        let snapshot = pipeline(store, MockMediaToolchain::new())
            .check_existing(&id)
            .await;

        assert_eq!(snapshot, ProcessingStatusSnapshot::default());
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let mut store = empty_store();
        recording_puts(&mut store);
        let mut toolchain = MockMediaToolchain::new();
        toolchain
            .expect_fetch_clip()
            .withf(|id, _| id.as_str() == "broken")
            .returning(|_, _| Err(ToolchainError::OutputMissing(PathBuf::from("broken.mp4"))));
        toolchain.expect_fetch_clip().returning(|id, dir| {
            let path = dir.join(format!("{}.mp4", id));
            std::fs::write(&path, b"video").unwrap();
            Ok(path)
        });
        toolchain.expect_probe_duration().returning(|_| Ok(Some(10.0)));
        toolchain.expect_extract_audio().returning(|_, dst, _, _| {
            std::fs::write(dst, b"RIFF").unwrap();
            Ok(())
        });

        let batch = ClipBatch::parse(&["broken".to_string(), "fine".to_string()]).unwrap();
        let summary = pipeline(store, toolchain).process_batch(&batch).await;

        assert_eq!(summary.total, 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].clip_id, "broken");
        assert!(summary.results[1].success);
    }
}
