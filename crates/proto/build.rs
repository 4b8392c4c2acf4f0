use std::{env, error::Error, path::PathBuf};

fn main() -> Result<(), Box<dyn Error>> {
  let root = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("../..");
  let proto_dir = root.join("proto");
  let csi_proto_file = proto_dir.join("csi.proto");

  // Prefer a protoc from the environment, fall back to the vendored binary.
  if env::var_os("PROTOC").is_none() {
    env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
  }
  let well_known_types = protoc_bin_vendored::include_path()?;

  println!("cargo:rerun-if-changed={}", csi_proto_file.display());

  tonic_build::configure()
    .build_server(true)
    .build_client(true)
    .compile_protos(&[csi_proto_file], &[proto_dir, well_known_types])?;

  Ok(())
}
