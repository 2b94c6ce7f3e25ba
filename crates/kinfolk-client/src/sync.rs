//! Reconciliation of local members against the server's registered
//! faces.
//!
//! Reconciliation is best-effort: it never blocks whatever the caller
//! was actually doing. A failed listing aborts the pass; a failed
//! individual registration is counted and skipped. Running a pass twice
//! with no local changes performs zero registrations the second time,
//! because already-registered ids are filtered out up front.

use std::collections::HashSet;
use std::path::PathBuf;

use kinfolk_core::types::RegisteredFace;
use kinfolk_core::IdMapper;
use thiserror::Error;

use crate::client::{ClientError, FaceBackend};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("could not list registered faces: {0}")]
    ListFailed(#[source] ClientError),
}

/// A local member as the orchestrator sees it: id, display name, and
/// the reference photo (if one has been assigned).
#[derive(Debug, Clone)]
pub struct Person {
    pub local_id: i64,
    pub display_name: String,
    pub photo_path: Option<PathBuf>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Members newly registered during this pass.
    pub registered: usize,
    /// Members whose registration (or photo decode) failed.
    pub failed: usize,
    /// Members the server already knew about.
    pub already_registered: usize,
    /// Members with no reference photo to register.
    pub skipped_no_photo: usize,
    /// Fresh server listing, fetched only when something was registered.
    pub refreshed: Option<Vec<RegisteredFace>>,
}

/// Register every local member with a reference photo that the server
/// does not know about yet.
///
/// Registrations run one at a time to bound server-side load and keep
/// the counters consistent. Per-member failures never abort the batch.
pub async fn reconcile<B: FaceBackend + Sync>(
    backend: &B,
    mapper: &IdMapper,
    people: &[Person],
) -> Result<SyncReport, SyncError> {
    let faces = backend.list_faces().await.map_err(SyncError::ListFailed)?;
    let server_ids: HashSet<&str> = faces.iter().map(|f| f.member_id.as_str()).collect();
    tracing::debug!(registered = server_ids.len(), "server listing fetched");

    let mut report = SyncReport::default();

    for person in people {
        let Some(photo_path) = person.photo_path.as_deref() else {
            report.skipped_no_photo += 1;
            continue;
        };

        let server_id = mapper.to_server_id(person.local_id);
        if server_ids.contains(server_id.to_string().as_str()) {
            report.already_registered += 1;
            continue;
        }

        let photo = match image::open(photo_path) {
            Ok(img) => img,
            Err(err) => {
                tracing::warn!(
                    person = %person.display_name,
                    path = %photo_path.display(),
                    error = %err,
                    "could not decode reference photo"
                );
                report.failed += 1;
                continue;
            }
        };

        match backend
            .register_face(server_id, &person.display_name, &photo)
            .await
        {
            Ok(message) => {
                tracing::info!(person = %person.display_name, %message, "registered");
                report.registered += 1;
            }
            Err(err) => {
                tracing::warn!(person = %person.display_name, error = %err, "registration failed");
                report.failed += 1;
            }
        }
    }

    if report.registered > 0 {
        // Refresh the caller's view of who is registered; a failure
        // here only costs the refresh, not the pass.
        match backend.list_faces().await {
            Ok(faces) => report.refreshed = Some(faces),
            Err(err) => tracing::warn!(error = %err, "post-sync listing failed"),
        }
    }

    Ok(report)
}

/// Project a server listing down to this device's local member ids.
/// Entries from other devices' namespaces or with non-numeric ids are
/// dropped, not errors.
pub fn registered_local_ids(faces: &[RegisteredFace], mapper: &IdMapper) -> HashSet<i64> {
    faces
        .iter()
        .filter(|f| {
            f.member_id
                .trim()
                .parse::<i64>()
                .is_ok_and(|id| IdMapper::device_of(id) == mapper.device_id())
        })
        .filter_map(|f| IdMapper::local_id_from_wire(&f.member_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgb, RgbImage};
    use kinfolk_core::types::RecognitionMatch;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory recognition service: registrations land in `faces`.
    #[derive(Default)]
    struct StubBackend {
        faces: Mutex<Vec<RegisteredFace>>,
        register_calls: AtomicUsize,
        list_calls: AtomicUsize,
        fail_listing: bool,
        fail_registration: bool,
    }

    impl StubBackend {
        fn with_faces(faces: Vec<RegisteredFace>) -> Self {
            Self {
                faces: Mutex::new(faces),
                ..Self::default()
            }
        }

        fn register_calls(&self) -> usize {
            self.register_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FaceBackend for StubBackend {
        async fn check_health(&self) -> bool {
            true
        }

        async fn register_face(
            &self,
            server_id: i64,
            member_name: &str,
            _photo: &DynamicImage,
        ) -> Result<String, ClientError> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_registration {
                return Err(ClientError::Api("no face detected".to_string()));
            }
            self.faces.lock().unwrap().push(RegisteredFace {
                member_id: server_id.to_string(),
                member_name: member_name.to_string(),
            });
            Ok("registered".to_string())
        }

        async fn recognize_face(
            &self,
            _photo: &DynamicImage,
            _threshold: f64,
        ) -> Result<Vec<RecognitionMatch>, ClientError> {
            Ok(Vec::new())
        }

        async fn delete_face(&self, _server_id: i64) -> Result<String, ClientError> {
            Ok("deleted".to_string())
        }

        async fn clear_all(&self) -> Result<String, ClientError> {
            Ok("cleared".to_string())
        }

        async fn list_faces(&self) -> Result<Vec<RegisteredFace>, ClientError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing {
                return Err(ClientError::Api("list failed".to_string()));
            }
            Ok(self.faces.lock().unwrap().clone())
        }
    }

    fn write_test_photo(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(16, 16, Rgb([200, 180, 160]));
        img.save(&path).unwrap();
        path
    }

    fn person(local_id: i64, name: &str, photo: Option<PathBuf>) -> Person {
        Person {
            local_id,
            display_name: name.to_string(),
            photo_path: photo,
        }
    }

    #[tokio::test]
    async fn test_registers_missing_members() {
        let dir = tempfile::tempdir().unwrap();
        let photo = write_test_photo(dir.path(), "ada.png");
        let backend = StubBackend::default();
        let mapper = IdMapper::new(42);

        let people = vec![
            person(7, "Ada", Some(photo)),
            person(8, "Brendan", None),
        ];
        let report = reconcile(&backend, &mapper, &people).await.unwrap();

        assert_eq!(report.registered, 1);
        assert_eq!(report.skipped_no_photo, 1);
        assert_eq!(report.failed, 0);
        let refreshed = report.refreshed.unwrap();
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].member_id, "42000007");
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let photo = write_test_photo(dir.path(), "ada.png");
        let backend = StubBackend::default();
        let mapper = IdMapper::new(42);
        let people = vec![person(7, "Ada", Some(photo))];

        let first = reconcile(&backend, &mapper, &people).await.unwrap();
        assert_eq!(first.registered, 1);
        assert_eq!(backend.register_calls(), 1);

        let second = reconcile(&backend, &mapper, &people).await.unwrap();
        assert_eq!(second.registered, 0);
        assert_eq!(second.already_registered, 1);
        assert_eq!(backend.register_calls(), 1, "no network registrations on second run");
        assert!(second.refreshed.is_none(), "no refresh when nothing changed");
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_the_pass() {
        let backend = StubBackend {
            fail_listing: true,
            ..StubBackend::default()
        };
        let mapper = IdMapper::new(42);
        let people = vec![person(7, "Ada", None)];

        let result = reconcile(&backend, &mapper, &people).await;
        assert!(matches!(result, Err(SyncError::ListFailed(_))));
        assert_eq!(backend.register_calls(), 0);
    }

    #[tokio::test]
    async fn test_per_member_failures_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_test_photo(dir.path(), "ada.png");
        let missing = dir.path().join("gone.png");
        let backend = StubBackend {
            fail_registration: true,
            ..StubBackend::default()
        };
        let mapper = IdMapper::new(42);

        let people = vec![
            person(7, "Ada", Some(good)),
            person(8, "Brendan", Some(missing)),
        ];
        let report = reconcile(&backend, &mapper, &people).await.unwrap();

        assert_eq!(report.registered, 0);
        assert_eq!(report.failed, 2);
        assert!(report.refreshed.is_none());
    }

    #[tokio::test]
    async fn test_foreign_namespace_entries_are_ignored() {
        // Local id 7 under device 99 — a different install's member.
        let backend = StubBackend::with_faces(vec![RegisteredFace {
            member_id: "99000007".to_string(),
            member_name: "Somebody Else".to_string(),
        }]);
        let dir = tempfile::tempdir().unwrap();
        let photo = write_test_photo(dir.path(), "ada.png");
        let mapper = IdMapper::new(42);
        let people = vec![person(7, "Ada", Some(photo))];

        let report = reconcile(&backend, &mapper, &people).await.unwrap();
        assert_eq!(report.registered, 1, "same local id in a foreign namespace is not ours");
    }

    #[test]
    fn test_registered_local_ids_drops_foreign_and_garbage() {
        let mapper = IdMapper::new(42);
        let faces = vec![
            RegisteredFace {
                member_id: "42000007".to_string(),
                member_name: "Ada".to_string(),
            },
            RegisteredFace {
                member_id: "99000008".to_string(),
                member_name: "Foreign".to_string(),
            },
            RegisteredFace {
                member_id: "not-numeric".to_string(),
                member_name: "Garbage".to_string(),
            },
        ];
        let ids = registered_local_ids(&faces, &mapper);
        assert_eq!(ids, HashSet::from([7]));
    }
}
