use std::env;
use std::path::PathBuf;
use std::process::{Command, Output};

use tracing::{debug, info};

/// 오류 메시지에 담을 stderr 마지막 줄 수.
const STDERR_TAIL_LINES: usize = 5;

/// 환경 변수에 지정된 경로를 먼저 쓰고, 없으면 PATH에서 실행 파일을 찾는다.
pub fn find_executable(env_var: &str, exe_name: &str) -> Option<PathBuf> {
    let path = env::var_os(env_var)
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| which::which(exe_name).ok())?;

    info!("Using {exe_name} path: {path:?}");
    Some(path)
}

/// 명령을 실행하고 출력을 모은다. 종료 코드 확인은 호출자가 한다.
/// 유닉스에서는 별도 프로세스 그룹으로 띄워 터미널의 Ctrl-C가 진행 중인 작업을 죽이지 않게 한다.
pub fn run(mut command: Command) -> std::io::Result<Output> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    debug!(command = ?command, "running external tool");
    command.output()
}

/// 실패한 도구의 stderr에서 마지막 몇 줄만 남긴다.
pub fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        format!("종료 상태 {}", output.status)
    } else {
        tail
    }
}
