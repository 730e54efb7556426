use crate::{
    config::BatchConfig,
    course::{Course, LectureRecord},
    failure::{FailureLedger, FailureReason},
    pipeline::{LectureOutcome, LectureProcessor, LectureTask},
};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Frozen copy of a lecture whose output was missing after its first attempt.
#[derive(Clone, Debug)]
pub struct RetryEntry {
    pub lecture: LectureRecord,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub last_reason: Option<FailureReason>,
}

impl RetryEntry {
    pub fn lecture_id(&self) -> String {
        self.lecture.id.to_string()
    }

    pub fn task(&self) -> LectureTask<'_> {
        LectureTask {
            lecture: &self.lecture,
            output: &self.output,
            work_dir: &self.work_dir,
        }
    }

    fn is_retryable(&self) -> bool {
        self.last_reason
            .as_ref()
            .is_none_or(FailureReason::is_retryable)
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retried: usize,
    /// Lectures whose output still doesn't exist after every retry pass.
    pub missing: Vec<RetryEntry>,
}

/// Walks a course chapter by chapter and owns the run's failure ledger.
pub struct Batch<'a> {
    config: &'a BatchConfig,
    ledger: FailureLedger,
}

impl<'a> Batch<'a> {
    pub fn new(config: &'a BatchConfig) -> Self {
        Self {
            config,
            ledger: FailureLedger::default(),
        }
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    pub fn run(
        &mut self,
        processor: &dyn LectureProcessor,
        course: &Course,
        course_dir: &Path,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut queued = vec![];
        let total_chapters = course.chapters.len();

        for chapter in &course.chapters {
            if let Some(filter) = &self.config.chapters
                && !filter.contains(chapter.chapter_index)
            {
                info!(
                    "Skipping chapter {} as it is not in the specified filter",
                    chapter.chapter_index
                );
                continue;
            }

            let chapter_dir = course_dir.join(chapter.directory_name());
            fs::create_dir_all(&chapter_dir)
                .with_context(|| format!("couldn't create {}", chapter_dir.display()))?;

            info!(
                "======= Processing chapter {} of {} =======",
                chapter.chapter_index, total_chapters
            );

            let total_lectures = chapter.lectures.len();

            for lecture in &chapter.lectures {
                if !lecture.is_video() {
                    debug!(
                        "Skipping non video lecture {} ({:?})",
                        lecture.id, lecture.extension
                    );
                    continue;
                }

                info!(
                    "> Processing lecture {} of {}",
                    lecture.index, total_lectures
                );

                let output = chapter_dir.join(lecture.file_name());
                let task = LectureTask {
                    lecture,
                    output: &output,
                    work_dir: &chapter_dir,
                };

                let last_reason = match processor.process(&task) {
                    LectureOutcome::Skipped => {
                        report.skipped += 1;
                        None
                    }
                    LectureOutcome::Completed => {
                        report.completed += 1;
                        None
                    }
                    LectureOutcome::Failed(reason) => {
                        report.failed += 1;
                        self.ledger.record(
                            &lecture.id.to_string(),
                            &lecture.lecture_title,
                            reason.clone(),
                        );
                        Some(reason)
                    }
                };

                if !output.is_file() {
                    queued.push(RetryEntry {
                        lecture: lecture.clone(),
                        output,
                        work_dir: chapter_dir.clone(),
                        last_reason,
                    });
                }
            }
        }

        report.retried = queued.len();
        report.missing = RetryController::new(self.config.retry_limit).run(
            processor,
            queued,
            &mut self.ledger,
        );
        Ok(report)
    }

    /// Log the tail of the ledger, returns whether strict mode requires a failing exit.
    pub fn strict_violation(&self) -> bool {
        if !self.config.strict || self.ledger.is_empty() {
            return false;
        }

        error!(
            "> Strict mode: {} lecture(s) still failed ({} failure record(s))",
            self.ledger.lecture_count(),
            self.ledger.len()
        );

        for record in self.ledger.tail(20) {
            error!("> Failed lecture: {}", record);
        }

        true
    }
}

/// Re-runs lectures whose output is missing, up to `limit` passes.
pub struct RetryController {
    limit: u32,
}

impl RetryController {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// Returns the entries which still have no output.
    ///
    /// A lecture's ledger records are cleared as soon as a retry produces its output.
    pub fn run(
        &self,
        processor: &dyn LectureProcessor,
        entries: Vec<RetryEntry>,
        ledger: &mut FailureLedger,
    ) -> Vec<RetryEntry> {
        if entries.is_empty() {
            return entries;
        }

        if self.limit == 0 {
            warn!(
                "> Failed lecture retries disabled, skipping {} queued lecture(s).",
                entries.len()
            );
            return entries;
        }

        let (mut pending, mut settled): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(RetryEntry::is_retryable);

        for entry in &settled {
            if let Some(reason) = &entry.last_reason {
                info!(
                    "> Not retrying '{}': {}",
                    entry.lecture.lecture_title, reason
                );
            }
        }

        for pass in 1..=self.limit {
            if pending.is_empty() {
                break;
            }

            info!(
                "> Retrying {} lecture(s), pass {} of {}",
                pending.len(),
                pass,
                self.limit
            );

            let mut next = vec![];

            for mut entry in pending {
                info!("> Retrying lecture '{}'", entry.lecture.lecture_title);
                let outcome = processor.process(&entry.task());

                if entry.output.is_file() {
                    info!(
                        "> Retry succeeded for '{}'",
                        entry.lecture.lecture_title
                    );
                    ledger.clear(&entry.lecture_id());
                    continue;
                }

                if let LectureOutcome::Failed(reason) = outcome {
                    ledger.record(
                        &entry.lecture_id(),
                        &entry.lecture.lecture_title,
                        reason.clone(),
                    );
                    entry.last_reason = Some(reason);
                }

                if entry.is_retryable() {
                    next.push(entry);
                } else {
                    settled.push(entry);
                }
            }

            pending = next;
        }

        for entry in &pending {
            warn!(
                "> Still missing after retries: {} ({})",
                entry.lecture.lecture_title, entry.lecture.id
            );
        }

        pending.append(&mut settled);
        pending
    }
}
