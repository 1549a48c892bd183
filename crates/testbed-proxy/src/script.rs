//! Rendering of proxy scripts.
//!
//! Scripts are bash with `set -euo pipefail`, so a failing engine call fails
//! the proxy instead of passing silently. Every value baked into a script is
//! single-quoted.

use std::path::PathBuf;

use crate::proxyset::SharedContainer;
use crate::target::ProxyTarget;

/// Interpreter line of every script.
pub const SHEBANG: &str = "#!/usr/bin/env bash";

/// Mount point of the host input directory inside the container.
pub const INPUT_MOUNT: &str = "/tmp/input";

/// A client binary to proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProxyBinary {
    /// Arguments are passed through unchanged.
    Direct(String),
    /// The first argument is a host file; its directory is mounted read-only
    /// and the argument rewritten to the mounted path. Always runs one-shot.
    HostInput(String),
}

impl ProxyBinary {
    /// Binary name, also the script's file name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Direct(name) | Self::HostInput(name) => name,
        }
    }
}

/// Quotes a value for bash.
#[must_use]
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Everything that goes into a proxy script apart from the binary name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSettings {
    /// Container engine CLI.
    pub docker: PathBuf,
    /// Client image.
    pub image: String,
    /// Server the clients connect to.
    pub target: ProxyTarget,
    /// Shared container, when in shared mode.
    pub shared: Option<SharedContainer>,
    /// Seconds to wait on the cold-start lock.
    pub lock_wait_secs: u64,
    /// Command keeping the shared container alive.
    pub keepalive: Vec<String>,
}

impl ScriptSettings {
    /// Renders the script for `binary`.
    #[must_use]
    pub fn render(&self, binary: &ProxyBinary) -> String {
        let body = match (binary, &self.shared) {
            (ProxyBinary::HostInput(name), _) => self.host_input(name),
            (ProxyBinary::Direct(name), Some(shared)) => self.shared_exec(name, shared),
            (ProxyBinary::Direct(name), None) => {
                format!("exec {} {} \"$@\"\n", self.one_shot(""), quote(name))
            }
        };
        format!("{SHEBANG}\nset -euo pipefail\n\n{body}")
    }

    fn docker(&self) -> String {
        quote(&self.docker.to_string_lossy())
    }

    /// `--link` and `-e` flags connecting a container to the target.
    fn connection_flags(&self) -> String {
        let mut flags = Vec::new();
        if let Some(link) = self.target.link() {
            flags.push(format!("--link {}", quote(&link)));
        }
        for (key, value) in self.target.env() {
            flags.push(format!("-e {key}={}", quote(&value)));
        }
        flags.join(" ")
    }

    /// `docker run` of a fresh auto-removed container, up to the image.
    fn one_shot(&self, extra: &str) -> String {
        let mut command = format!("{} run -i --rm ", self.docker());
        if !extra.is_empty() {
            command.push_str(extra);
            command.push(' ');
        }
        command.push_str(&self.connection_flags());
        command.push(' ');
        command.push_str(&quote(&self.image));
        command
    }

    fn host_input(&self, name: &str) -> String {
        let run = self.one_shot(&format!("-v \"$mountDirectory\":{INPUT_MOUNT}:ro"));
        format!(
            r#"if [ "$#" -eq 0 ]; then
    echo "{name}: a local file argument is required" >&2
    exit 1
fi
source="$1"
shift
cd "$(dirname "$source")"
mountDirectory="$PWD"
fileName="$(basename "$source")"
exec {run} {binary} "{INPUT_MOUNT}/$fileName" "$@"
"#,
            binary = quote(name),
        )
    }

    fn shared_exec(&self, name: &str, shared: &SharedContainer) -> String {
        let keepalive: Vec<String> = self.keepalive.iter().map(|w| quote(w)).collect();
        format!(
            r#"docker={docker}
container={container}
lockFile={lock_file}
lockDir="$lockFile.d"
lockWait={lock_wait}

isRunning() {{
    [ "$("$docker" inspect -f '{{{{.State.Running}}}}' "$container" 2>/dev/null || true)" = "true" ]
}}

coldStart() {{
    if isRunning; then
        return 0
    fi
    "$docker" rm -f "$container" >/dev/null 2>&1 || true
    if ! "$docker" run -d --name "$container" {flags} {image} {keepalive} >/dev/null; then
        isRunning
    fi
}}

if ! isRunning; then
    if command -v flock >/dev/null 2>&1; then
        exec 9>>"$lockFile"
        if ! flock -w "$lockWait" 9; then
            echo "proxy: gave up waiting for $lockFile after ${{lockWait}}s" >&2
        fi
        coldStart
        exec 9>&-
    elif mkdir -p "$(dirname "$lockDir")" 2>/dev/null; then
        waited=0
        owned=0
        while true; do
            if mkdir "$lockDir" 2>/dev/null; then
                owned=1
                trap 'rmdir "$lockDir" 2>/dev/null || true' EXIT
                break
            fi
            if [ "$waited" -ge "$lockWait" ]; then
                echo "proxy: gave up waiting for $lockDir after ${{lockWait}}s" >&2
                break
            fi
            sleep 1
            waited=$((waited + 1))
        done
        coldStart
        if [ "$owned" -eq 1 ]; then
            rmdir "$lockDir" 2>/dev/null || true
            trap - EXIT
        fi
    else
        coldStart
    fi
fi

exec "$docker" exec -i "$container" {binary} "$@"
"#,
            docker = self.docker(),
            container = quote(&shared.name),
            lock_file = quote(&shared.lock_path.to_string_lossy()),
            lock_wait = self.lock_wait_secs,
            flags = self.connection_flags(),
            image = quote(&self.image),
            keepalive = keepalive.join(" "),
            binary = quote(name),
        )
    }
}
