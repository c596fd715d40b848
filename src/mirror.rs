use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::api::{part_path, CtfdApi};
use crate::error::Result;
use crate::models::metadata::{self, METADATA_FILE};
use crate::models::{ChallengeMetadata, ChallengeSummary};
use crate::sanitize::{attachment_file_name, numbered_file_name, sanitize_segment};

/// Written last; its presence means the challenge is complete.
pub const DESCRIPTION_FILE: &str = "description.md";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MirrorReport {
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub files: usize,
    pub failed_files: usize,
    pub bytes: u64,
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    Downloaded { files: usize, bytes: u64 },
    Skipped,
    /// Some attachments failed, so no marker was written.
    Incomplete { files: usize, bytes: u64, failed: usize },
}

pub struct Mirror<A> {
    api: A,
    output: PathBuf,
    write_metadata: bool,
}

pub fn is_downloaded(dir: &Path) -> bool {
    dir.join(DESCRIPTION_FILE).exists()
}

impl<A: CtfdApi> Mirror<A> {
    pub fn new(api: A, output: PathBuf, write_metadata: bool) -> Self {
        Self {
            api,
            output,
            write_metadata,
        }
    }

    pub fn challenge_dir(&self, summary: &ChallengeSummary) -> PathBuf {
        self.output
            .join(sanitize_segment(&summary.category))
            .join(sanitize_segment(&summary.name))
    }

    /// Fallback for a challenge whose name sanitizes to a directory that
    /// already belongs to another one: `<name>-<id>`.
    pub fn suffixed_dir(&self, summary: &ChallengeSummary) -> PathBuf {
        let name = sanitize_segment(&summary.name);
        self.output
            .join(sanitize_segment(&summary.category))
            .join(format!("{}-{}", name.trim_end_matches('-'), summary.id))
    }

    /// Assigns every listed challenge its own directory. The first challenge
    /// in listing order keeps the plain name, later collisions get the id.
    pub fn challenge_dirs(&self, challenges: &[ChallengeSummary]) -> Vec<PathBuf> {
        let mut taken = HashSet::new();

        challenges
            .iter()
            .map(|summary| {
                let dir = self.challenge_dir(summary);
                if taken.insert(dir.clone()) {
                    return dir;
                }
                let suffixed = self.suffixed_dir(summary);
                warn!(
                    "{} ({}) collides with another challenge, using {}",
                    summary.name,
                    summary.category,
                    suffixed.display()
                );
                taken.insert(suffixed.clone());
                suffixed
            })
            .collect()
    }

    /// Mirrors every listed challenge. Only a failure to list challenges is
    /// returned; anything that goes wrong with a single challenge is logged
    /// and counted in the report.
    pub fn run(&self) -> Result<MirrorReport> {
        fs::create_dir_all(&self.output)?;

        let challenges = self.api.list_challenges()?;
        info!("Found {} challenges", challenges.len());

        let mut report = MirrorReport {
            total: challenges.len(),
            ..MirrorReport::default()
        };

        let dirs = self.challenge_dirs(&challenges);
        for (summary, dir) in challenges.iter().zip(dirs) {
            match self.mirror_challenge(summary, dir) {
                Ok(Outcome::Downloaded { files, bytes }) => {
                    report.downloaded += 1;
                    report.files += files;
                    report.bytes += bytes;
                }
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Incomplete { files, bytes, failed }) => {
                    report.failed += 1;
                    report.failed_files += failed;
                    report.files += files;
                    report.bytes += bytes;
                }
                Err(e) => {
                    error!(
                        "Error downloading {} ({}) [id {}]: {}",
                        summary.name, summary.category, summary.id, e
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    pub fn mirror_challenge(&self, summary: &ChallengeSummary, dir: PathBuf) -> Result<Outcome> {
        let dir = match metadata::load(&dir) {
            Ok(existing) if existing.id != summary.id => {
                let suffixed = self.suffixed_dir(summary);
                warn!(
                    "{} already holds challenge #{} ({}), using {} for {}",
                    dir.display(),
                    existing.id,
                    existing.name,
                    suffixed.display(),
                    summary.name
                );
                suffixed
            }
            _ => dir,
        };

        if is_downloaded(&dir) {
            self.log_skip(summary, &dir);
            return Ok(Outcome::Skipped);
        }

        info!("Downloading {} ({})", summary.name, summary.category);
        fs::create_dir_all(&dir)?;

        let detail = self.api.challenge(summary.id)?;
        if let Some(solves) = summary.solves {
            debug!("{} has {} solves, {} attachment(s)", summary.name, solves, detail.files.len());
        }

        let mut used = HashSet::from([DESCRIPTION_FILE.to_string(), METADATA_FILE.to_string()]);
        let mut saved = Vec::new();
        let mut bytes = 0;
        let mut failed = 0;

        for file in &detail.files {
            let name = unique_name(attachment_file_name(file), &mut used);
            let dest = dir.join(&name);

            match self.api.download(file, &dest) {
                Ok(written) => {
                    debug!("Saved {} ({} bytes)", dest.display(), written);
                    bytes += written;
                    saved.push(name);
                }
                Err(e) => {
                    error!("Error downloading file {} for {}: {}", name, summary.name, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!(
                "{} of {} file(s) failed for {}, it will be retried on the next run",
                failed,
                detail.files.len(),
                summary.name
            );
            return Ok(Outcome::Incomplete {
                files: saved.len(),
                bytes,
                failed,
            });
        }

        let files = saved.len();
        if self.write_metadata {
            let source_url = format!("{}/challenges#{}-{}", self.api.base_url(), detail.name, detail.id);
            let metadata = ChallengeMetadata::new(summary, &detail, saved, source_url);
            metadata::save(&dir, &metadata)?;
        }

        write_marker(&dir, &detail.description)?;

        Ok(Outcome::Downloaded { files, bytes })
    }

    fn log_skip(&self, summary: &ChallengeSummary, dir: &Path) {
        match metadata::load(dir) {
            Ok(existing) => info!(
                "Skipping {} ({}), already downloaded at {}",
                summary.name, summary.category, existing.downloaded_at
            ),
            Err(_) => info!(
                "Skipping {} ({}), already downloaded",
                summary.name, summary.category
            ),
        }
    }
}

/// The description goes through a `.part` file so an interrupted write
/// never leaves a marker behind.
fn write_marker(dir: &Path, description: &str) -> Result<()> {
    let marker = dir.join(DESCRIPTION_FILE);
    let part = part_path(&marker);

    fs::write(&part, description)?;
    fs::rename(&part, &marker)?;
    Ok(())
}

fn unique_name(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }

    let mut n = 2;
    loop {
        let candidate = numbered_file_name(&name, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::models::ChallengeDetail;

    #[derive(Default)]
    struct FakeApi {
        fail_listing: bool,
        challenges: Vec<ChallengeSummary>,
        details: HashMap<u64, ChallengeDetail>,
        files: HashMap<String, Vec<u8>>,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl FakeApi {
        fn with_challenge(mut self, id: u64, name: &str, category: &str, files: &[(&str, &str)]) -> Self {
            self.challenges.push(
                serde_json::from_value(json!({"id": id, "name": name, "category": category, "value": 100}))
                    .unwrap(),
            );
            let links: Vec<&str> = files.iter().map(|(link, _)| *link).collect();
            self.details.insert(
                id,
                serde_json::from_value(json!({
                    "id": id,
                    "name": name,
                    "category": category,
                    "description": format!("Description of {}", name),
                    "files": links,
                }))
                .unwrap(),
            );
            for (link, body) in files {
                self.files.insert(link.to_string(), body.as_bytes().to_vec());
            }
            self
        }
    }

    impl CtfdApi for FakeApi {
        fn base_url(&self) -> &str {
            "http://ctf.test"
        }

        fn list_challenges(&self) -> Result<Vec<ChallengeSummary>> {
            self.calls.borrow_mut().push("list".to_string());
            if self.fail_listing {
                return Err(Error::Status {
                    url: "http://ctf.test/api/v1/challenges".to_string(),
                    status: 403,
                });
            }
            Ok(self.challenges.clone())
        }

        fn challenge(&self, id: u64) -> Result<ChallengeDetail> {
            self.calls.borrow_mut().push(format!("challenge {}", id));
            self.details.get(&id).cloned().ok_or(Error::Status {
                url: format!("http://ctf.test/api/v1/challenges/{}", id),
                status: 404,
            })
        }

        fn download(&self, file: &str, dest: &Path) -> Result<u64> {
            self.calls.borrow_mut().push(format!("download {}", file));
            let body = self.files.get(file).ok_or(Error::Status {
                url: file.to_string(),
                status: 404,
            })?;
            fs::write(dest, body)?;
            Ok(body.len() as u64)
        }
    }

    fn detail_calls(calls: &Rc<RefCell<Vec<String>>>) -> usize {
        calls.borrow().iter().filter(|c| c.starts_with("challenge")).count()
    }

    #[test]
    fn test_fresh_run_layout() {
        let out = tempfile::tempdir().unwrap();
        let api = FakeApi::default()
            .with_challenge(1, "Baby RSA", "Crypto", &[("/files/aa/out.txt?token=t", "n = 77\n")])
            .with_challenge(2, "Sanity Check", "Misc", &[]);

        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();
        assert_eq!(
            report,
            MirrorReport {
                total: 2,
                downloaded: 2,
                skipped: 0,
                failed: 0,
                files: 1,
                failed_files: 0,
                bytes: 7,
            }
        );

        let rsa = out.path().join("crypto").join("baby-rsa");
        assert_eq!(
            fs::read_to_string(rsa.join(DESCRIPTION_FILE)).unwrap(),
            "Description of Baby RSA"
        );
        assert_eq!(fs::read(rsa.join("out.txt")).unwrap(), b"n = 77\n");

        let saved = metadata::load(&rsa).unwrap();
        assert_eq!(saved.id, 1);
        assert_eq!(saved.files, vec!["out.txt"]);
        assert_eq!(saved.source_url, "http://ctf.test/challenges#Baby RSA-1");

        assert!(is_downloaded(&out.path().join("misc").join("sanity-check")));
    }

    #[test]
    fn test_rerun_is_noop() {
        let out = tempfile::tempdir().unwrap();
        let build = || {
            FakeApi::default()
                .with_challenge(1, "Baby RSA", "Crypto", &[("/files/aa/out.txt", "x")])
                .with_challenge(2, "Warmup", "Misc", &[])
        };

        Mirror::new(build(), out.path().to_path_buf(), true).run().unwrap();
        let before = fs::read_to_string(out.path().join("crypto/baby-rsa/challenge.json")).unwrap();

        let api = build();
        let calls = Rc::clone(&api.calls);
        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.downloaded, 0);
        assert_eq!(report.files, 0);
        assert_eq!(*calls.borrow(), vec!["list".to_string()]);

        let after = fs::read_to_string(out.path().join("crypto/baby-rsa/challenge.json")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_existing_marker_is_respected() {
        let out = tempfile::tempdir().unwrap();
        let dir = out.path().join("web").join("login");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DESCRIPTION_FILE), "hand written").unwrap();

        let api = FakeApi::default().with_challenge(9, "Login", "Web", &[]);
        let calls = Rc::clone(&api.calls);
        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(detail_calls(&calls), 0);
        assert_eq!(fs::read_to_string(dir.join(DESCRIPTION_FILE)).unwrap(), "hand written");
    }

    #[test]
    fn test_detail_failure_skips_challenge_and_continues() {
        let out = tempfile::tempdir().unwrap();
        let mut api = FakeApi::default()
            .with_challenge(1, "Broken", "Pwn", &[])
            .with_challenge(2, "Fine", "Pwn", &[]);
        api.details.remove(&1);

        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded, 1);
        assert!(!is_downloaded(&out.path().join("pwn/broken")));
        assert!(is_downloaded(&out.path().join("pwn/fine")));
    }

    #[test]
    fn test_failed_attachment_leaves_no_marker_and_retries() {
        let out = tempfile::tempdir().unwrap();
        let mut api = FakeApi::default().with_challenge(
            5,
            "Forensics 101",
            "Forensics",
            &[("/files/a/disk.img", "disk"), ("/files/b/notes.txt", "notes")],
        );
        api.files.remove("/files/a/disk.img");

        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();
        let dir = out.path().join("forensics/forensics-101");
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_files, 1);
        assert_eq!(report.files, 1);
        assert!(!is_downloaded(&dir));
        assert!(!dir.join(METADATA_FILE).exists());
        assert!(dir.join("notes.txt").exists());

        let api = FakeApi::default().with_challenge(
            5,
            "Forensics 101",
            "Forensics",
            &[("/files/a/disk.img", "disk"), ("/files/b/notes.txt", "notes")],
        );
        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.files, 2);
        assert!(is_downloaded(&dir));
        assert_eq!(fs::read(dir.join("disk.img")).unwrap(), b"disk");
    }

    #[test]
    fn test_listing_failure_is_returned() {
        let out = tempfile::tempdir().unwrap();
        let api = FakeApi {
            fail_listing: true,
            ..FakeApi::default()
        };

        let err = Mirror::new(api, out.path().join("fresh"), true).run().unwrap_err();
        assert!(matches!(err, Error::Status { status: 403, .. }));
        assert!(out.path().join("fresh").is_dir());
    }

    #[test]
    fn test_colliding_attachment_names() {
        let out = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_challenge(
            3,
            "Dupes",
            "Rev",
            &[
                ("/files/1/chall.tar.gz", "one"),
                ("/files/2/chall.tar.gz", "two"),
                ("/files/3/description.md", "attached"),
            ],
        );

        Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();
        let dir = out.path().join("rev/dupes");
        assert_eq!(fs::read(dir.join("chall.tar.gz")).unwrap(), b"one");
        assert_eq!(fs::read(dir.join("chall-2.tar.gz")).unwrap(), b"two");
        assert_eq!(fs::read(dir.join("description-2.md")).unwrap(), b"attached");
        assert_eq!(
            fs::read_to_string(dir.join(DESCRIPTION_FILE)).unwrap(),
            "Description of Dupes"
        );
    }

    #[test]
    fn test_metadata_can_be_disabled() {
        let out = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_challenge(1, "Quiet", "Misc", &[]);

        Mirror::new(api, out.path().to_path_buf(), false).run().unwrap();
        let dir = out.path().join("misc/quiet");
        assert!(is_downloaded(&dir));
        assert!(!dir.join(METADATA_FILE).exists());
    }

    #[test]
    fn test_hostile_names_stay_inside_output() {
        let out = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_challenge(
            7,
            "../../escape",
            "..",
            &[("/files/x/..%2f..%2fevil.sh", "#!/bin/sh")],
        );
        let mirror = Mirror::new(api, out.path().to_path_buf(), true);

        let summary: ChallengeSummary =
            serde_json::from_value(json!({"id": 7, "name": "../../escape", "category": ".."})).unwrap();
        let dir = mirror.challenge_dir(&summary);
        assert!(dir.starts_with(out.path()));
        assert_eq!(dir.file_name().unwrap(), "escape");

        let report = mirror.run().unwrap();
        assert_eq!(report.downloaded, 1);
        let saved = metadata::load(&dir).unwrap();
        assert_eq!(saved.files.len(), 1);
        assert!(saved.files[0].starts_with("attachment-"));
        assert!(dir.join(&saved.files[0]).exists());
    }

    #[test]
    fn test_colliding_challenge_names_get_separate_dirs() {
        let out = tempfile::tempdir().unwrap();
        let build = || {
            FakeApi::default()
                .with_challenge(1, "Baby RSA", "Crypto", &[("/files/a/n.txt", "n")])
                .with_challenge(2, "baby rsa!", "Crypto", &[("/files/b/e.txt", "e")])
        };

        let mut api = build();
        api.files.remove("/files/a/n.txt");
        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded, 1);

        let first = out.path().join("crypto/baby-rsa");
        let second = out.path().join("crypto/baby-rsa-2");
        assert!(!is_downloaded(&first));
        assert!(is_downloaded(&second));
        assert!(second.join("e.txt").exists());
        assert!(!first.join("e.txt").exists());

        let report = Mirror::new(build(), out.path().to_path_buf(), true).run().unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.skipped, 1);
        assert!(is_downloaded(&first));
        assert_eq!(metadata::load(&first).unwrap().id, 1);
        assert_eq!(metadata::load(&second).unwrap().id, 2);
    }

    #[test]
    fn test_dir_owned_by_other_challenge_uses_id_suffix() {
        let out = tempfile::tempdir().unwrap();
        let taken = out.path().join("crypto/baby-rsa");
        fs::create_dir_all(&taken).unwrap();
        let owner = ChallengeMetadata {
            id: 99,
            name: "Baby-RSA".to_string(),
            category: "Crypto".to_string(),
            kind: None,
            value: None,
            connection_info: None,
            tags: vec![],
            files: vec![],
            source_url: "http://ctf.test/challenges#Baby-RSA-99".to_string(),
            downloaded_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        metadata::save(&taken, &owner).unwrap();
        fs::write(taken.join(DESCRIPTION_FILE), "older").unwrap();

        let api = FakeApi::default().with_challenge(1, "Baby RSA", "Crypto", &[]);
        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();

        assert_eq!(report.downloaded, 1);
        assert_eq!(fs::read_to_string(taken.join(DESCRIPTION_FILE)).unwrap(), "older");
        let own = out.path().join("crypto/baby-rsa-1");
        assert!(is_downloaded(&own));
        assert_eq!(metadata::load(&own).unwrap().id, 1);
    }

    #[test]
    fn test_suffixed_dir_keeps_single_hyphens() {
        let out = tempfile::tempdir().unwrap();
        let mirror = Mirror::new(FakeApi::default(), out.path().to_path_buf(), true);
        let summary: ChallengeSummary =
            serde_json::from_value(json!({"id": 7, "name": "rev-", "category": "Rev"})).unwrap();
        assert_eq!(mirror.suffixed_dir(&summary), out.path().join("rev").join("rev-7"));
    }

    #[test]
    fn test_marker_is_not_left_as_part_file() {
        let out = tempfile::tempdir().unwrap();
        let dir = out.path().join("misc/interrupted");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("description.md.part"), "trunc").unwrap();
        assert!(!is_downloaded(&dir));

        let api = FakeApi::default().with_challenge(4, "Interrupted", "Misc", &[]);
        let report = Mirror::new(api, out.path().to_path_buf(), true).run().unwrap();

        assert_eq!(report.downloaded, 1);
        assert_eq!(
            fs::read_to_string(dir.join(DESCRIPTION_FILE)).unwrap(),
            "Description of Interrupted"
        );
        assert!(!dir.join("description.md.part").exists());
    }
}
