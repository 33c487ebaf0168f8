use bytes::Bytes;
use clap::Args;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::client::UploadClient;

/// Send one file to a running server in chunks
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Base URL of the upload server
    #[arg(long, env = "CLAIMDOC_SERVER", default_value = "http://localhost:3000")]
    pub server: String,

    /// MIME type; guessed from the extension when omitted
    #[arg(long = "mime")]
    pub mime_type: Option<String>,

    /// Claim report the document belongs to
    #[arg(long = "report")]
    pub report_id: Option<Uuid>,

    /// Chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Chunks in flight at once
    #[arg(long = "parallel")]
    pub parallelism: Option<usize>,

    /// Resume an existing upload session instead of starting a new one
    #[arg(long, value_name = "UPLOAD_ID", conflicts_with_all = ["mime_type", "report_id"])]
    pub resume: Option<Uuid>,
}

fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// `upload` subcommand: send one file to a running server
pub async fn run_upload_command(args: UploadArgs) -> anyhow::Result<()> {
    let data = Bytes::from(tokio::fs::read(&args.file).await?);
    let filename = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("{} has no usable file name", args.file.display()))?
        .to_string();

    let mut client = UploadClient::new(&args.server)?;
    if let Some(chunk_size) = args.chunk_size {
        client = client.with_chunk_size(chunk_size);
    }
    if let Some(parallelism) = args.parallelism {
        client = client.with_parallelism(parallelism);
    }

    let file = match args.resume {
        Some(upload_id) => client.resume_bytes(upload_id, data).await?,
        None => {
            let mime_type = args
                .mime_type
                .unwrap_or_else(|| guess_mime_type(&args.file).to_string());
            client
                .upload_bytes(&filename, &mime_type, data, args.report_id)
                .await?
        }
    };

    tracing::info!(
        "Uploaded {} ({} bytes, sha256 {}) to {}",
        file.filename,
        file.size,
        file.checksum,
        file.location
    );
    println!("{}", serde_json::to_string_pretty(&file)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        upload: UploadArgs,
    }

    fn parse(list: &[&str]) -> Result<UploadArgs, clap::Error> {
        TestCli::try_parse_from(std::iter::once("upload").chain(list.iter().copied()))
            .map(|cli| cli.upload)
    }

    #[test]
    fn test_parse_full_argument_list() {
        let report = Uuid::new_v4();
        let parsed = parse(&[
            "claim.pdf",
            "--server",
            "http://uploads.internal:8080",
            "--report",
            &report.to_string(),
            "--chunk-size",
            "1048576",
            "--parallel",
            "4",
        ])
        .unwrap();

        assert_eq!(parsed.file, PathBuf::from("claim.pdf"));
        assert_eq!(parsed.server, "http://uploads.internal:8080");
        assert_eq!(parsed.report_id, Some(report));
        assert_eq!(parsed.chunk_size, Some(1_048_576));
        assert_eq!(parsed.parallelism, Some(4));
        assert!(parsed.resume.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["a.pdf", "--chunk-size"]).is_err());
        assert!(parse(&["a.pdf", "--chunk-size", "big"]).is_err());
        assert!(parse(&["a.pdf", "--resume", "not-a-uuid"]).is_err());
        assert!(parse(&["a.pdf", "b.pdf"]).is_err());
        assert!(parse(&["a.pdf", "--force"]).is_err());
    }

    #[test]
    fn test_resume_conflicts_with_new_upload_options() {
        let id = Uuid::new_v4().to_string();
        assert!(parse(&["a.pdf", "--resume", &id]).is_ok());
        assert!(parse(&["a.pdf", "--resume", &id, "--mime", "application/pdf"]).is_err());
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("scan.JPG")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("claim.pdf")), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("README")), "application/octet-stream");
    }
}
