use std::io::Write;

use serde::Serialize;

use crate::error::Error;

/// Pretty-printed document followed by a newline.
pub fn write_pretty<T: Serialize + ?Sized>(value: &T, writer: &mut impl Write) -> Result<(), Error> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

/// One compact document per line, for event streams.
pub fn write_line<T: Serialize + ?Sized>(value: &T, writer: &mut impl Write) -> Result<(), Error> {
    serde_json::to_writer(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Connection;
    use crate::core::trace::{EventKind, TraceEvent};
    use chrono::{TimeZone, Utc};

    fn conn() -> Connection {
        Connection {
            pid: 1234,
            process: "nginx".to_string(),
            proto: "tcp".to_string(),
            state: "LISTEN".to_string(),
            laddr: "0.0.0.0".to_string(),
            lport: 80,
            ts: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn connection_array_keeps_field_order() {
        let mut buf = Vec::new();
        write_pretty(&[conn()], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("[\n  {\n    \"pid\": 1234,\n    \"process\": \"nginx\""));
        let pid = text.find("\"pid\"").unwrap();
        let ts = text.find("\"ts\"").unwrap();
        assert!(pid < ts);
        assert!(text.contains("\"ts\": \"2024-05-01T12:00:00.000+00:00\""));
        assert!(text.ends_with("]\n"));
    }

    #[test]
    fn events_are_one_per_line() {
        let event = TraceEvent {
            ts: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap(),
            event: EventKind::Closed,
            connection: conn(),
        };
        let mut buf = Vec::new();
        write_line(&event, &mut buf).unwrap();
        write_line(&event, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("{\"ts\":\"2024-05-01T12:00:01.000+00:00\",\"event\":\"closed\",\"connection\":{\"pid\":1234"));
    }
}
