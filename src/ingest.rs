//! Construcción del índice a partir de los documentos subidos.
//!
//! Cada documento se deja primero en el directorio de staging y después se lee y
//! se pasa al motor, en orden y de uno en uno. Un fallo en un documento se
//! registra y el lote continúa; al final se borran del staging sólo los
//! ficheros ingeridos con éxito.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use crate::{
    app_state::{update_status, SharedStatus},
    engine::RagEngine,
    error::AppError,
    models::{BuildReport, Document, DocumentFailure},
};

/// Nombre de fichero seguro: sólo el último componente de la ruta.
fn sanitize_filename(raw: &str) -> Result<String> {
    let normalized = raw.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        return Err(anyhow!("Nombre de fichero no válido: '{raw}'"));
    }
    Ok(name.to_string())
}

fn ensure_plain_text(name: &str) -> Result<()> {
    match mime_guess::from_path(name).first() {
        Some(mime) if mime == mime_guess::mime::TEXT_PLAIN => Ok(()),
        Some(mime) => Err(anyhow!("Tipo de fichero no soportado ({mime}); sólo se aceptan .txt")),
        None => Err(anyhow!("Tipo de fichero desconocido; sólo se aceptan .txt")),
    }
}

/// Evita que dos ficheros del mismo lote con igual nombre se pisen en el staging.
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path.extension().and_then(|e| e.to_str());
    let mut n = 1;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Nombres ya presentes en el staging (p. ej. fallos de lotes anteriores).
async fn staged_names(upload_dir: &Path) -> std::io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(upload_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Deja el estado libre si la construcción se abandona antes de terminar.
struct BusyGuard<'a> {
    status: &'a SharedStatus,
    finished: bool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Construcción interrumpida antes de terminar.");
            update_status(self.status, |s| {
                s.is_busy = false;
                s.progress = 0.0;
                s.message = "Construcción interrumpida antes de terminar.".to_string();
            });
        }
    }
}

async fn stage_document(upload_dir: &Path, doc: &Document, taken: &mut HashSet<String>) -> Result<PathBuf> {
    let name = sanitize_filename(&doc.filename)?;
    ensure_plain_text(&name)?;
    let path = upload_dir.join(unique_name(&name, taken));
    tokio::fs::write(&path, &doc.content).await?;
    Ok(path)
}

async fn ingest_staged(engine: &dyn RagEngine, path: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("No se pudo leer como texto UTF-8: {e}"))?;
    let stats = engine.insert(&text).await?;
    if stats.duplicate {
        info!("{} ya estaba indexado ({}).", path.display(), stats.doc_id);
    } else if stats.chunks == 0 {
        info!("{} está vacío; no hay nada que indexar.", path.display());
    } else {
        info!(
            "{} ingerido: {} chunks, {} entidades, {} relaciones.",
            path.display(),
            stats.chunks,
            stats.entities,
            stats.relations
        );
    }
    Ok(())
}

/// Ingiere un lote de documentos y devuelve el informe por documento.
pub async fn build_index(
    engine: &dyn RagEngine,
    upload_dir: &Path,
    documents: Vec<Document>,
    status: &SharedStatus,
) -> Result<BuildReport, AppError> {
    if documents.is_empty() {
        return Err(AppError::NoDocuments);
    }
    tokio::fs::create_dir_all(upload_dir).await?;
    let mut taken = staged_names(upload_dir).await?;

    let total = documents.len();
    update_status(status, |s| {
        s.is_busy = true;
        s.progress = 0.0;
        s.message = format!("Guardando {total} documentos...");
    });
    let mut guard = BusyGuard {
        status,
        finished: false,
    };

    // --- Fase 1: staging ---
    let mut staged: Vec<Result<PathBuf, String>> = Vec::with_capacity(total);
    for doc in &documents {
        let result = stage_document(upload_dir, doc, &mut taken)
            .await
            .map_err(|e| format!("{e:#}"));
        if let Err(e) = &result {
            error!("No se pudo preparar {}: {e}", doc.filename);
        }
        staged.push(result);
    }

    // --- Fase 2: ingesta secuencial ---
    let mut processed_files = Vec::new();
    let mut failures = Vec::new();
    let mut ingested_paths = Vec::new();

    for (index, (doc, slot)) in documents.iter().zip(staged).enumerate() {
        update_status(status, |s| {
            s.message = format!("[{}/{}] Procesando: {}...", index + 1, total, doc.filename);
            s.progress = index as f32 / total as f32;
        });

        let outcome = match slot {
            Ok(path) => match ingest_staged(engine, &path).await {
                Ok(()) => {
                    ingested_paths.push(path);
                    Ok(())
                }
                Err(e) => Err(format!("{e:#}")),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => processed_files.push(doc.filename.clone()),
            Err(e) => {
                error!("Error ingiriendo {}: {e}", doc.filename);
                failures.push(DocumentFailure {
                    filename: doc.filename.clone(),
                    error: e,
                });
            }
        }
    }

    // --- Fase 3: limpieza del staging ---
    for path in &ingested_paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("No se pudo borrar {} del staging: {e}", path.display());
        }
    }

    let report = BuildReport {
        total,
        processed: processed_files.len(),
        processed_files,
        failures,
    };
    info!("{report}");
    guard.finished = true;
    update_status(status, |s| {
        s.is_busy = false;
        s.progress = 1.0;
        s.message = report.to_string();
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::{read_status, Status};
    use crate::engine::testing::{FakeEmbedder, FakeLlm};
    use crate::engine::{GraphRagEngine, InsertStats, QueryParam};
    use crate::models::BuildOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Motor que cuenta inserciones y falla si el texto contiene "FAIL".
    #[derive(Default)]
    struct CountingEngine {
        inserts: AtomicUsize,
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RagEngine for CountingEngine {
        async fn insert(&self, text: &str) -> Result<InsertStats> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.texts.lock().unwrap().push(text.to_string());
            if text.contains("FAIL") {
                return Err(anyhow!("extracción fallida").context("llamada al LLM"));
            }
            Ok(InsertStats {
                doc_id: "doc-test".to_string(),
                chunks: 1,
                ..Default::default()
            })
        }

        async fn query(&self, _question: &str, _param: &QueryParam) -> Result<String> {
            Ok(String::new())
        }
    }

    fn status() -> SharedStatus {
        Arc::new(Mutex::new(Status::default()))
    }

    fn staged_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn zero_documents_never_touch_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CountingEngine::default();
        let result = build_index(&engine, &dir.path().join("uploads"), Vec::new(), &status()).await;
        assert!(matches!(result, Err(AppError::NoDocuments)));
        assert_eq!(engine.inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_documents_stay_staged_and_the_rest_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let engine = CountingEngine::default();
        let status = status();
        let docs = vec![
            Document::new("a.txt", "El trigo es un cereal."),
            Document::new("b.txt", "Este documento FAIL en la extracción."),
            Document::new("c.txt", "El arroz necesita agua."),
            Document::new("d.txt", vec![0xff, 0xfe, 0x00, 0x80]),
            Document::new("e.txt", "La roya ataca al trigo."),
        ];

        let report = build_index(&engine, &uploads, docs, &status).await.unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.processed, 3);
        assert_eq!(report.processed_files, vec!["a.txt", "c.txt", "e.txt"]);
        assert_eq!(report.outcome(), BuildOutcome::Partial);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(failed, vec!["b.txt", "d.txt"]);
        assert!(report.failures[0].error.contains("llamada al LLM"));
        assert!(report.failures[1].error.contains("UTF-8"));

        // El fichero no UTF-8 nunca llega al motor.
        assert_eq!(engine.inserts.load(Ordering::SeqCst), 4);
        assert_eq!(staged_names(&uploads), vec!["b.txt", "d.txt"]);

        let final_status = read_status(&status);
        assert!(!final_status.is_busy);
        assert_eq!(final_status.progress, 1.0);
    }

    #[tokio::test]
    async fn ingestion_follows_upload_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CountingEngine::default();
        let docs = vec![
            Document::new("3.txt", "tercero"),
            Document::new("1.txt", "primero"),
            Document::new("2.txt", "segundo"),
        ];
        build_index(&engine, dir.path(), docs, &status()).await.unwrap();
        assert_eq!(
            *engine.texts.lock().unwrap(),
            vec!["tercero".to_string(), "primero".to_string(), "segundo".to_string()]
        );
    }

    #[tokio::test]
    async fn only_plain_text_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let engine = CountingEngine::default();
        let docs = vec![
            Document::new("foto.png", vec![0x89, b'P', b'N', b'G']),
            Document::new("sin_extension", "texto"),
        ];

        let report = build_index(&engine, &uploads, docs, &status()).await.unwrap();

        assert_eq!(report.outcome(), BuildOutcome::Failure);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(engine.inserts.load(Ordering::SeqCst), 0);
        assert!(staged_names(&uploads).is_empty());
    }

    #[tokio::test]
    async fn filenames_cannot_escape_the_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let engine = CountingEngine::default();
        let docs = vec![Document::new("../FAIL.txt", "contenido FAIL")];

        let report = build_index(&engine, &uploads, docs, &status()).await.unwrap();

        assert_eq!(report.processed, 0);
        assert!(!dir.path().join("FAIL.txt").exists());
        assert_eq!(staged_names(&uploads), vec!["FAIL.txt"]);
    }

    #[tokio::test]
    async fn repeated_names_in_one_batch_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let engine = CountingEngine::default();
        let docs = vec![
            Document::new("notas.txt", "primera versión FAIL"),
            Document::new("notas.txt", "segunda versión FAIL"),
        ];

        build_index(&engine, &uploads, docs, &status()).await.unwrap();

        assert_eq!(staged_names(&uploads), vec!["notas-1.txt", "notas.txt"]);
        let texts = engine.texts.lock().unwrap();
        assert_eq!(texts[0], "primera versión FAIL");
        assert_eq!(texts[1], "segunda versión FAIL");
    }

    #[tokio::test]
    async fn a_later_batch_does_not_overwrite_an_earlier_failure() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let engine = CountingEngine::default();

        let first = vec![Document::new("notas.txt", "primera versión FAIL")];
        build_index(&engine, &uploads, first, &status()).await.unwrap();
        assert_eq!(staged_names(&uploads), vec!["notas.txt"]);

        let second = vec![Document::new("notas.txt", "segunda versión correcta")];
        let report = build_index(&engine, &uploads, second, &status()).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(staged_names(&uploads), vec!["notas.txt"]);
        let kept = std::fs::read_to_string(uploads.join("notas.txt")).unwrap();
        assert_eq!(kept, "primera versión FAIL");
    }

    /// Motor que tarda en cada inserción.
    struct SlowEngine;

    #[async_trait]
    impl RagEngine for SlowEngine {
        async fn insert(&self, _text: &str) -> Result<InsertStats> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(InsertStats::default())
        }

        async fn query(&self, _question: &str, _param: &QueryParam) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn abandoned_build_releases_the_busy_status() {
        let dir = tempfile::tempdir().unwrap();
        let status = status();
        let docs = vec![Document::new("a.txt", "uno"), Document::new("b.txt", "dos")];

        let cut = tokio::time::timeout(
            Duration::from_millis(100),
            build_index(&SlowEngine, dir.path(), docs, &status),
        )
        .await;

        assert!(cut.is_err());
        let after = read_status(&status);
        assert!(!after.is_busy);
        assert!(after.message.contains("interrumpida"));
    }

    #[tokio::test]
    async fn empty_text_file_counts_as_processed() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let engine = GraphRagEngine::initialize(
            &dir.path().join("rag"),
            Arc::new(FakeEmbedder::default()),
            Arc::new(FakeLlm::default()),
            400,
        )
        .await
        .unwrap();
        let docs = vec![
            Document::new("vacio.txt", "  \n\n "),
            Document::new("trigo.txt", "El Trigo es un cereal."),
        ];

        let report = build_index(&engine, &uploads, docs, &status()).await.unwrap();

        assert_eq!(report.outcome(), BuildOutcome::Success);
        assert_eq!(report.processed_files, vec!["vacio.txt", "trigo.txt"]);
        assert!(staged_names(&uploads).is_empty());
    }

    #[test]
    fn sanitize_keeps_only_the_last_component() {
        assert_eq!(sanitize_filename("a/b/c.txt").unwrap(), "c.txt");
        assert_eq!(sanitize_filename("C:\\docs\\d.txt").unwrap(), "d.txt");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("").is_err());
    }
}
