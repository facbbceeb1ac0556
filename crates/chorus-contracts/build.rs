use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const CONTRACTS_DIR: &str = "contracts/v1";
const OPENAPI_FILE: &str = "openapi/v1.yaml";

struct SchemaRow {
    reference: String,
    sha256: String,
    body: String,
}

fn main() {
    let manifest_dir =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .ancestors()
        .nth(2)
        .expect("workspace root")
        .to_path_buf();
    let contracts_dir = workspace_root.join(CONTRACTS_DIR);
    let openapi_path = workspace_root.join(OPENAPI_FILE);

    println!("cargo:rerun-if-changed={}", contracts_dir.display());
    println!("cargo:rerun-if-changed={}", openapi_path.display());

    let mut set_hasher = Sha256::new();
    let mut rows = Vec::new();
    for path in schema_files(&contracts_dir) {
        println!("cargo:rerun-if-changed={}", path.display());
        let bytes =
            fs::read(&path).unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
        let reference = contract_ref(&workspace_root, &path);

        set_hasher.update(reference.as_bytes());
        set_hasher.update([0]);
        set_hasher.update(&bytes);
        set_hasher.update([0]);

        rows.push(SchemaRow {
            sha256: hex_sha256(&bytes),
            body: String::from_utf8(bytes)
                .unwrap_or_else(|e| panic!("schema is not valid utf-8 {}: {e}", path.display())),
            reference,
        });
    }

    let openapi_bytes = fs::read(&openapi_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", openapi_path.display()));
    let set_sha = hex(&set_hasher.finalize());
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let openapi_sha = hex_sha256(&openapi_bytes);
    let mut out = String::new();
    out.push_str(&format!(
        "pub const GENERATED_OPENAPI_SHA256: &str = {openapi_sha:?};\n"
    ));
    out.push_str(&format!(
        "pub const GENERATED_CONTRACTS_SET_SHA256: &str = {set_sha:?};\n"
    ));
    out.push_str(&format!(
        "pub const GENERATED_AT_RFC3339: &str = {generated_at:?};\n"
    ));
    out.push_str("pub const GENERATED_CONTRACT_SCHEMAS: &[(&str, &str, &str)] = &[\n");
    for row in rows {
        out.push_str(&format!(
            "    ({:?}, {:?}, {:?}),\n",
            row.reference, row.sha256, row.body
        ));
    }
    out.push_str("];\n");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR"));
    fs::write(out_dir.join("generated_contracts.rs"), out).expect("write generated_contracts.rs");
}

fn schema_files(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("read {}: {e}", dir.display()))
        .filter_map(|entry| entry.ok().map(|v| v.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(".schema.json"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

fn contract_ref(root: &Path, full_path: &Path) -> String {
    let rel = full_path
        .strip_prefix(root)
        .unwrap_or_else(|e| panic!("{} is outside the workspace: {e}", full_path.display()));
    format!("../{}", rel.to_string_lossy().replace('\\', "/"))
}

fn hex_sha256(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
