//! Scilab subprocess session driven over stdin/stdout.
//!
//! Every request is written as one line followed by a unique sync marker;
//! output is collected until the marker comes back.

use std::{path::PathBuf, process::Stdio, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};
use tracing::{debug, info, warn};

use super::{
    is_identifier, scilab_string,
    signals::{send_interrupt, DefaultInterruptGuard},
    EngineError, EngineSession, EngineValue, ERROR_ECHO_MARKER,
};

const SYNC_PREFIX: &str = "__scilab_kernel_sync_";
const ERROR_MARKER: &str = "__scilab_kernel_error__";
const PROMPT: &str = "-->";
const CLOSE_GRACE: Duration = Duration::from_secs(2);
const RESYNC_TIMEOUT: Duration = Duration::from_secs(10);

struct ScilabProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Where the value displayed by a cell lives once it has run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResultSource {
    /// The variable the last statement assigned or named.
    Variable(String),
    /// `ans`, when the cell refreshed it.
    Answer,
}

pub struct ScilabSession {
    program: PathBuf,
    args: Vec<String>,
    startup_timeout: Duration,
    process: Option<ScilabProcess>,
    next_marker: u64,
    last_result: Option<ResultSource>,
}

impl ScilabSession {
    pub fn new(program: PathBuf, args: Vec<String>, startup_timeout: Duration) -> Self {
        Self { program, args, startup_timeout, process: None, next_marker: 0, last_result: None }
    }

    fn fresh_marker(&mut self) -> String {
        self.next_marker += 1;
        format!("{SYNC_PREFIX}{}__", self.next_marker)
    }

    fn spawn(&self) -> Result<ScilabProcess, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = {
            let _guard = DefaultInterruptGuard::acquire();
            cmd.spawn().map_err(|source| EngineError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?
        };
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Fault("no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Fault("no stdout".into()))?;

        Ok(ScilabProcess { child, stdin, stdout: BufReader::new(stdout) })
    }

    /// Writes `script` as one request and returns everything printed before
    /// the sync marker.
    async fn run_block(&mut self, script: &str) -> Result<String, EngineError> {
        let marker = self.fresh_marker();
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| EngineError::Fault("Scilab session is not running".into()))?;

        let request = format!("{script}\nmprintf(\"\\n%s\\n\", \"{marker}\");\n");
        process.stdin.write_all(request.as_bytes()).await?;
        process.stdin.flush().await?;

        read_until_marker(&mut process.stdout, &marker).await
    }
}

async fn read_until_marker(
    stdout: &mut BufReader<ChildStdout>,
    marker: &str,
) -> Result<String, EngineError> {
    let mut output = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if stdout.read_line(&mut line).await? == 0 {
            return Err(EngineError::Fault("Scilab process exited".into()));
        }
        let content = strip_prompts(&line);
        if content.trim() == marker {
            break;
        }
        // Markers of abandoned requests
        if content.trim_start().starts_with(SYNC_PREFIX) {
            continue;
        }
        output.push_str(content);
    }
    Ok(output.trim_end().to_string())
}

fn strip_prompts(line: &str) -> &str {
    let mut rest = line;
    while let Some(stripped) = rest.trim_start().strip_prefix(PROMPT) {
        rest = stripped;
    }
    rest
}

/// Wraps user code so failures are caught and reported after a marker line.
///
/// `__kernel_fresh__` records whether the cell produced a new `ans`; an
/// existing `ans` stays visible to the cell.
fn wrap_code(code: &str) -> String {
    let lines: Vec<String> = code.lines().map(scilab_string).collect();
    format!(
        "__kernel_fresh__ = %f; __kernel_had_ans__ = exists(\"ans\", \"l\") == 1; \
         if __kernel_had_ans__ then __kernel_ans__ = ans; end; \
         __kernel_status__ = execstr([{}], \"errcatch\"); \
         if __kernel_status__ <> 0 then mprintf(\"%s\\n%s\\n\", \"{ERROR_MARKER}\", strcat(lasterror(), \" \")); \
         else __kernel_fresh__ = exists(\"ans\", \"l\") == 1; \
         if __kernel_fresh__ & __kernel_had_ans__ then __kernel_fresh__ = ~isequal(ans, __kernel_ans__); end; end; \
         clear __kernel_status__ __kernel_had_ans__ __kernel_ans__;",
        lines.join("; ")
    )
}

/// Engine-side copy of the last result into `name`; prints `1` on success.
fn keep_script(source: &ResultSource, name: &str) -> String {
    match source {
        ResultSource::Variable(var) => format!(
            "if exists(\"{var}\", \"l\") then {name} = {var}; mprintf(\"1\\n\"); else mprintf(\"0\\n\"); end"
        ),
        ResultSource::Answer => format!(
            "if __kernel_fresh__ then {name} = ans; mprintf(\"1\\n\"); else mprintf(\"0\\n\"); end"
        ),
    }
}

/// Finds where the value displayed by the last statement of `code` lives.
fn result_source(code: &str) -> ResultSource {
    let Some(statement) = last_statement(code) else {
        return ResultSource::Answer;
    };
    if is_identifier(statement) {
        return ResultSource::Variable(statement.to_string());
    }
    match assignment_target(statement) {
        Some(name) => ResultSource::Variable(name.to_string()),
        None => ResultSource::Answer,
    }
}

/// Last non-empty statement, split on `;`, `,` and newlines outside
/// brackets, string literals and `//` comments.
fn last_statement(code: &str) -> Option<&str> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut prev = ' ';
    let mut start = 0;
    let mut last = None;
    let mut chars = code.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                // A doubled quote stays inside the literal
                if chars.peek().map(|&(_, next)| next) == Some(q) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            prev = c;
            continue;
        }
        match c {
            '"' => quote = Some('"'),
            // Otherwise a transpose
            '\'' if !(is_word_char(prev) || matches!(prev, ')' | ']' | '}' | '\'' | '.')) => {
                quote = Some('\'')
            }
            '/' if chars.peek().map(|&(_, next)| next) == Some('/') => {
                let end = code[idx..].find('\n').map_or(code.len(), |n| idx + n);
                let s = code[start..idx].trim();
                if !s.is_empty() {
                    last = Some(s);
                }
                while chars.peek().is_some_and(|&(i, _)| i < end) {
                    chars.next();
                }
                start = end;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ';' | ',' | '\n' if depth <= 0 => {
                let s = code[start..idx].trim();
                if !s.is_empty() {
                    last = Some(s);
                }
                start = idx + c.len_utf8();
            }
            _ => {}
        }
        if !c.is_whitespace() {
            prev = c;
        }
    }
    let tail = code.get(start..).map(str::trim).unwrap_or_default();
    if !tail.is_empty() {
        last = Some(tail);
    }
    last
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Variable a statement assigns to: `x = ..`, `x(2) = ..` or `s.f = ..`.
fn assignment_target(statement: &str) -> Option<&str> {
    let bytes = statement.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'=' if depth == 0 => {
                let before = i.checked_sub(1).map(|j| bytes[j]);
                let after = bytes.get(i + 1).copied();
                if matches!(before, Some(b'=' | b'<' | b'>' | b'~')) || after == Some(b'=') {
                    return None;
                }
                let lhs = statement[..i].trim();
                let name = lhs.split(['(', '.']).next()?.trim();
                return is_identifier(name).then_some(name);
            }
            _ => {}
        }
    }
    None
}

/// Splits raw output into the printed text and the error message, if any.
fn split_error(output: &str) -> (&str, Option<&str>) {
    match output.find(ERROR_MARKER) {
        Some(idx) => (&output[..idx], Some(output[idx + ERROR_MARKER.len()..].trim())),
        None => (output, None),
    }
}

impl EngineSession for ScilabSession {
    async fn start(&mut self) -> Result<(), EngineError> {
        if self.process.is_some() {
            return Ok(());
        }
        info!(program = %self.program.display(), args = ?self.args, "starting Scilab session");
        self.process = Some(self.spawn()?);
        self.last_result = None;

        match timeout(self.startup_timeout, self.run_block("lines(0); mode(0);")).await {
            Ok(Ok(banner)) => {
                debug!(%banner, "Scilab session ready");
                Ok(())
            }
            Ok(Err(err)) => {
                self.process = None;
                Err(err)
            }
            Err(_) => {
                self.process = None;
                Err(EngineError::Fault(format!(
                    "Scilab did not answer within {}s",
                    self.startup_timeout.as_secs()
                )))
            }
        }
    }

    async fn evaluate(&mut self, code: &str) -> Result<Option<EngineValue>, EngineError> {
        self.last_result = None;
        let output = self.run_block(&wrap_code(code)).await?;
        let (printed, error) = split_error(&output);
        if let Some(message) = error {
            if !printed.trim().is_empty() {
                debug!(output = %printed.trim(), "output before error");
            }
            return Err(EngineError::Evaluation(format!(
                "Scilab error while evaluating code\n{ERROR_ECHO_MARKER} {message}"
            )));
        }
        self.last_result = Some(result_source(code));
        if printed.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(EngineValue::from_display(printed)))
    }

    async fn keep_result(&mut self, name: &str) -> Result<bool, EngineError> {
        if !is_identifier(name) {
            return Err(EngineError::Evaluation(format!("invalid variable name: {name}")));
        }
        let Some(source) = self.last_result.take() else {
            return Ok(false);
        };
        debug!(?source, %name, "keeping result");
        let output = self.run_block(&keep_script(&source, name)).await?;
        Ok(output.trim() == "1")
    }

    async fn put(&mut self, name: &str, value: &EngineValue) -> Result<(), EngineError> {
        if !is_identifier(name) {
            return Err(EngineError::Evaluation(format!("invalid variable name: {name}")));
        }
        self.run_block(&format!("{name} = {};", value.to_literal())).await?;
        Ok(())
    }

    async fn exists(&mut self, name: &str) -> Result<bool, EngineError> {
        if !is_identifier(name) {
            return Ok(false);
        }
        let output = self
            .run_block(&format!("mprintf(\"%d\\n\", exists({}));", scilab_string(name)))
            .await?;
        Ok(output.trim() == "1")
    }

    async fn help(&mut self, name: &str) -> Result<(), EngineError> {
        let output = self.run_block(&format!("help({});", scilab_string(name))).await?;
        if !output.is_empty() {
            debug!(%output, "help output");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.last_result = None;
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        info!("closing Scilab session");
        if let Err(err) = process.stdin.write_all(b"exit\n").await {
            debug!(%err, "Scilab stdin already closed");
        }
        drop(process.stdin);
        match timeout(CLOSE_GRACE, process.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Scilab exited"),
            Ok(Err(err)) => warn!(%err, "waiting for Scilab failed"),
            Err(_) => {
                warn!("Scilab did not exit in time, killing it");
                process.child.kill().await?;
            }
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), EngineError> {
        self.last_result = None;
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        if let Some(pid) = process.child.id() {
            info!(pid, "interrupting Scilab");
            send_interrupt(pid)?;
        }
        // Leave the pause level the interrupt drops Scilab into
        process.stdin.write_all(b"abort\n").await?;
        match timeout(RESYNC_TIMEOUT, self.run_block("")).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(EngineError::Fault("Scilab did not recover from interrupt".into())),
        }
    }

    fn is_running(&self) -> bool {
        self.process.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wrapped_code_is_one_line_string_array() {
        let wrapped = wrap_code("x = 2\ndisp(\"a\")");
        assert!(!wrapped.contains('\n'));
        assert!(wrapped.contains("__kernel_status__ = execstr([\"x = 2\"; \"disp(\"\"a\"\")\"], \"errcatch\");"));
        assert!(wrapped.contains(ERROR_MARKER));
        assert!(wrapped.contains("__kernel_fresh__ = %f;"));
    }

    #[test]
    fn error_marker_splits_output() {
        let raw = format!("partial\n{ERROR_MARKER}\nundefined variable: y");
        let (printed, error) = split_error(&raw);
        assert_eq!(printed, "partial\n");
        assert_eq!(error, Some("undefined variable: y"));

        assert_eq!(split_error("x = 2."), ("x = 2.", None));
    }

    #[test]
    fn prompts_are_stripped() {
        assert_eq!(strip_prompts("--> x = 2\n"), " x = 2\n");
        assert_eq!(strip_prompts("-->-->ans\n"), "ans\n");
        assert_eq!(strip_prompts("plain\n"), "plain\n");
    }

    #[test]
    fn result_lives_in_assigned_variable() {
        let var = |n: &str| ResultSource::Variable(n.to_string());
        assert_eq!(result_source("s = \"hello\""), var("s"));
        assert_eq!(result_source("m = [1 2 3]"), var("m"));
        assert_eq!(result_source("a = 1; b(2) = 5"), var("b"));
        assert_eq!(result_source("st.name = 'it''s'"), var("st"));
        assert_eq!(result_source("x = 1;\ny"), var("y"));
        assert_eq!(result_source("z = 4 // note, with a comma"), var("z"));
    }

    #[test]
    fn expressions_leave_their_result_in_ans() {
        assert_eq!(result_source("[1 2 3] * 2"), ResultSource::Answer);
        assert_eq!(result_source("x == 2"), ResultSource::Answer);
        assert_eq!(result_source("disp(\"a=b\")"), ResultSource::Answer);
        assert_eq!(result_source("[q, r] = f(1, 2)"), ResultSource::Answer);
        assert_eq!(result_source("x = 1, m'"), ResultSource::Answer);
        assert_eq!(result_source(""), ResultSource::Answer);
    }

    #[test]
    fn keep_copies_inside_the_engine() {
        let script = keep_script(&ResultSource::Variable("s".into()), "last_kernel_value");
        assert_eq!(
            script,
            "if exists(\"s\", \"l\") then last_kernel_value = s; mprintf(\"1\\n\"); else mprintf(\"0\\n\"); end"
        );
        let script = keep_script(&ResultSource::Answer, "last_kernel_value");
        assert!(script.contains("last_kernel_value = ans;"));
        assert!(script.starts_with("if __kernel_fresh__ then"));
    }

    #[tokio::test]
    async fn calls_without_process_are_faults() {
        let mut session = ScilabSession::new("scilab-cli".into(), vec![], Duration::from_secs(1));
        assert!(!session.is_running());
        assert!(matches!(session.evaluate("1").await, Err(EngineError::Fault(_))));
        assert!(!session.keep_result("last_kernel_value").await.unwrap());
        assert!(session.close().await.is_ok());
        assert!(session.interrupt().await.is_ok());
    }

    /// Shell stand-in answering the request framing the way Scilab does.
    #[cfg(unix)]
    const STAND_IN: &str = r#"
trap '' INT
while IFS= read -r line; do
  case "$line" in
    *__scilab_kernel_sync_*)
      printf '\n%s\n' "$(printf '%s' "$line" | sed 's/.*\(__scilab_kernel_sync_[0-9]*__\).*/\1/')" ;;
    'say '*) printf '%s %s\n' '-->' "${line#say }" ;;
    stale) printf '__scilab_kernel_sync_0__\nafter\n' ;;
    hang) sleep 1 ;;
    die) exit 0 ;;
    *execstr*fail*) printf '__scilab_kernel_error__\nundefined variable: fail\n' ;;
    *execstr*hello*) printf ' s  =\n\n  hello\n' ;;
    *execstr*) printf ' ans  =\n\n   1.   2.   3.\n' ;;
    *'last_kernel_value = s;'*) printf '1\n' ;;
    *'last_kernel_value = ans;'*) printf '1\n' ;;
    *exists*) printf '0\n' ;;
  esac
done
"#;

    #[cfg(unix)]
    async fn stand_in() -> ScilabSession {
        let mut session = ScilabSession::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), STAND_IN.to_string()],
            Duration::from_secs(5),
        );
        {
            let _serial = crate::engine::signals::serial_sigint();
            session.process = Some(session.spawn().unwrap());
        }
        session.run_block("lines(0); mode(0);").await.unwrap();
        session
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_arrives_in_order_without_prompts() {
        let mut session = stand_in().await;
        let output = session.run_block("say one\nsay two").await.unwrap();
        assert_eq!(output.lines().map(str::trim).collect::<Vec<_>>(), vec!["one", "two"]);
        assert_eq!(session.run_block("say three").await.unwrap().trim(), "three");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_markers_are_skipped() {
        let mut session = stand_in().await;
        assert_eq!(session.run_block("stale").await.unwrap(), "after");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_exit_is_a_fault() {
        let mut session = stand_in().await;
        assert!(matches!(session.run_block("die").await, Err(EngineError::Fault(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn engine_errors_are_evaluation_errors() {
        let mut session = stand_in().await;
        match session.evaluate("fail").await {
            Err(EngineError::Evaluation(msg)) => {
                assert!(msg.ends_with("Scilab returned: undefined variable: fail"), "{msg}")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!session.keep_result("last_kernel_value").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn string_and_matrix_results_are_kept_by_the_engine() {
        let mut session = stand_in().await;

        let shown = session.evaluate("s = \"hello\"").await.unwrap();
        assert_eq!(shown, Some(EngineValue::Text("s  =\n\n  hello".into())));
        assert!(session.keep_result("last_kernel_value").await.unwrap());

        session.evaluate("[1 2 3]").await.unwrap();
        assert!(session.keep_result("last_kernel_value").await.unwrap());
        // Only the evaluation right before may be kept
        assert!(!session.keep_result("last_kernel_value").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_resyncs_after_abandoned_request() {
        let mut session = stand_in().await;
        let abandoned = timeout(Duration::from_millis(100), session.run_block("hang")).await;
        assert!(abandoned.is_err());

        session.interrupt().await.unwrap();
        assert!(session.is_running());
        assert_eq!(session.run_block("say back").await.unwrap().trim(), "back");
    }
}
