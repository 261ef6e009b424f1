#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// A running daemon plus the push events seen since the last `take_events`.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    events: Vec<Value>,
    next_id: u64,
    pub workspace: PathBuf,
}

impl Sidecar {
    /// Spawns the daemon without opening a workspace.
    pub fn spawn(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let exe = env!("CARGO_BIN_EXE_enrolld");
        let mut child = Command::new(exe)
            .env_remove("ENROLLD_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn enrolld");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            events: Vec::new(),
            next_id: 0,
            workspace,
        }
    }

    /// Spawns the daemon and opens a fresh workspace.
    pub fn start(prefix: &str) -> Self {
        let mut sidecar = Self::spawn(prefix);
        let path = sidecar.workspace.to_string_lossy().to_string();
        sidecar.request_ok("workspace.select", json!({ "path": path }));
        sidecar
    }

    pub fn write_raw(&mut self, line: &str) {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
    }

    pub fn read_line(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read line");
        assert!(!line.trim().is_empty(), "daemon closed stdout");
        serde_json::from_str(line.trim()).expect("parse line json")
    }

    /// Sends one request and returns its response; event lines before it are kept.
    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        self.write_raw(&payload.to_string());
        loop {
            let value = self.read_line();
            if value.get("event").is_some() {
                self.events.push(value);
                continue;
            }
            assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
            return value;
        }
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Returns the error object, asserting the code.
    pub fn request_err(&mut self, method: &str, params: Value, code: &str) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        let error = value.get("error").cloned().unwrap_or(Value::Null);
        assert_eq!(error["code"], code, "{} error: {}", method, error);
        error
    }

    pub fn take_events(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.events)
    }

    pub fn seed_program(&mut self) -> i64 {
        let dept = self.request_ok(
            "departments.create",
            json!({ "code": "CCS", "name": "College of Computing Studies" }),
        );
        let program = self.request_ok(
            "programs.create",
            json!({
                "code": "BSIT",
                "name": "BS Information Technology",
                "departmentId": dept["departmentId"],
            }),
        );
        program["programId"].as_i64().expect("programId")
    }

    pub fn seed_student(&mut self, student_id: &str, program_id: i64, year_level: i64) {
        self.request_ok(
            "admin.students.create",
            json!({
                "studentId": student_id,
                "firstName": "Juan",
                "middleName": "Santos",
                "lastName": "Dela Cruz",
                "email": format!("{}@school.test", student_id),
                "programId": program_id,
                "yearLevel": year_level,
                "section": "A",
            }),
        );
    }

    pub fn seed_subject(
        &mut self,
        section: &str,
        code: &str,
        units: i64,
        year_level: i64,
        semester: &str,
        prerequisites: Value,
    ) -> i64 {
        let created = self.request_ok(
            "subjects.create",
            json!({
                "subjectSection": section,
                "subjectCode": code,
                "description": format!("{} lecture", code),
                "units": units,
                "yearLevel": year_level,
                "semester": semester,
                "prerequisites": prerequisites,
            }),
        );
        created["subjectId"].as_i64().expect("subjectId")
    }

    pub fn seed_settings(&mut self, academic_year: &str) {
        let (start, end) = academic_year.split_once('-').expect("year label");
        self.request_ok(
            "settings.update",
            json!({
                "firstSemStart": format!("{}-08-01", start),
                "firstSemEnd": format!("{}-12-15", start),
                "firstSemEnrollmentStart": format!("{}-07-01", start),
                "firstSemEnrollmentEnd": format!("{}-07-31", start),
                "secondSemStart": format!("{}-01-10", end),
                "secondSemEnd": format!("{}-05-20", end),
                "secondSemEnrollmentStart": format!("{}-01-02", end),
                "secondSemEnrollmentEnd": format!("{}-01-09", end),
                "summerStart": format!("{}-06-01", end),
                "summerEnd": format!("{}-07-15", end),
                "currentAcademicYear": academic_year,
            }),
        );
    }

    /// Latest outbox message addressed to `to`.
    pub fn last_email(&mut self, to: &str) -> Value {
        let out = self.request_ok("outbox.list", json!({ "to": to }));
        out["messages"]
            .as_array()
            .and_then(|m| m.last())
            .cloned()
            .expect("an email in the outbox")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

/// First six-digit run in a message body.
pub fn code_in(body: &str) -> String {
    let digits: Vec<char> = body.chars().collect();
    for w in digits.windows(6) {
        if w.iter().all(|c| c.is_ascii_digit()) {
            return w.iter().collect();
        }
    }
    panic!("no code in {}", body);
}
