/// App-level file listing the buildpack chain.
pub const CONFIG_FILE: &str = "multi-buildpack.yml";

/// Optional app-provided process-type mapping.
pub const PROCFILE: &str = "Procfile";

/// Cache slot reserved for the terminal buildpack of a multi-buildpack chain.
pub const PRIMARY_SLOT: &str = "primary";

/// Number of hex characters used for hash-keyed directory names.
pub const REF_KEY_LEN: usize = 32;

pub const STAGING_INFO_FILE: &str = "staging_info.yml";

/// Prefix of the scratch directories that host a staging run.
pub const SCRATCH_PREFIX: &str = "contents";

pub const DOWNLOADS_PREFIX: &str = "downloads";

/// Hidden directory inside the app that carries the merged deps tree.
pub const FOLDED_DEPS_DIR: &str = ".deps";

pub const PROFILE_DIR: &str = ".profile.d";

pub const PROFILE_SCRIPT: &str = "000_multi-buildpack.sh";

/// Environment variable exported at container start pointing at the deps tree.
pub const DEPS_DIR_ENV: &str = "DEPS_DIR";

pub const RELEASE_FILE: &str = "multi-buildpack-release.yml";

pub const DEFAULT_BUILDPACKS_DIR: &str = "/tmp/buildpacks";
