//! Minimal SMTP delivery for mail notifications.
//!
//! One short conversation per message: EHLO, optional AUTH PLAIN, MAIL
//! FROM, RCPT TO, DATA, QUIT. The exchange is plaintext; point this at a
//! local relay or a submission port that accepts it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use watchz_core::{Result, WatchError};

use super::url::ServiceUrl;

/// Default SMTP submission port when the URL names none.
const DEFAULT_PORT: u16 = 25;

/// Mail notifier configuration, from an `smtp://` service URL.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    from: String,
    to: Vec<String>,
    subject: String,
}

impl SmtpNotifier {
    /// Build from a parsed `smtp://` URL. `from` and at least one `to`
    /// query parameter are required.
    pub fn from_url(url: &ServiceUrl) -> Result<Self> {
        let from = url
            .param("from")
            .ok_or_else(|| WatchError::Notification("smtp URL needs ?from=".to_string()))?
            .to_string();
        let to: Vec<String> = url
            .param("to")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        if to.is_empty() {
            return Err(WatchError::Notification(
                "smtp URL needs ?to=".to_string(),
            ));
        }

        Ok(Self {
            host: url.host.clone(),
            port: url.port.unwrap_or(DEFAULT_PORT),
            user: url.user.clone(),
            password: url.password.clone(),
            from,
            to,
            subject: url
                .param("subject")
                .unwrap_or("watchz notification")
                .to_string(),
        })
    }

    /// Deliver one message.
    pub async fn send(&self, body: &str) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                WatchError::Notification(format!("smtp connect {}:{}: {e}", self.host, self.port))
            })?;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        expect_reply(&mut reader, 220).await?;
        command(&mut write_half, &mut reader, "EHLO watchz", 250).await?;

        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            let plain = STANDARD.encode(format!("\0{user}\0{password}"));
            command(&mut write_half, &mut reader, &format!("AUTH PLAIN {plain}"), 235).await?;
        }

        command(
            &mut write_half,
            &mut reader,
            &format!("MAIL FROM:<{}>", self.from),
            250,
        )
        .await?;
        for rcpt in &self.to {
            command(&mut write_half, &mut reader, &format!("RCPT TO:<{rcpt}>"), 250).await?;
        }
        command(&mut write_half, &mut reader, "DATA", 354).await?;

        let mut message = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n",
            self.from,
            self.to.join(", "),
            self.subject
        );
        for line in body.lines() {
            // Dot-stuffing per the DATA transparency rules
            if line.starts_with('.') {
                message.push('.');
            }
            message.push_str(line);
            message.push_str("\r\n");
        }
        message.push_str(".\r\n");
        write_half
            .write_all(message.as_bytes())
            .await
            .map_err(smtp_io)?;
        expect_reply(&mut reader, 250).await?;

        // QUIT is a courtesy; the message is already accepted
        let _ = write_half.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

async fn command(
    write_half: &mut WriteHalf<TcpStream>,
    reader: &mut BufReader<ReadHalf<TcpStream>>,
    line: &str,
    expected: u16,
) -> Result<()> {
    write_half
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .map_err(smtp_io)?;
    expect_reply(reader, expected).await
}

/// Read one (possibly multi-line) reply and require the expected code.
async fn expect_reply(
    reader: &mut BufReader<ReadHalf<TcpStream>>,
    expected: u16,
) -> Result<()> {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(smtp_io)?;
        if n == 0 {
            return Err(WatchError::Notification(
                "smtp server closed the connection".to_string(),
            ));
        }
        let line = line.trim_end();
        if line.len() < 4 {
            return Err(WatchError::Notification(format!("short smtp reply: '{line}'")));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| WatchError::Notification(format!("bad smtp reply: '{line}'")))?;
        // 250-... continues a multi-line reply; 250<space> ends it
        if line.as_bytes()[3] == b'-' {
            continue;
        }
        if code != expected {
            return Err(WatchError::Notification(format!(
                "smtp expected {expected}, got '{line}'"
            )));
        }
        return Ok(());
    }
}

fn smtp_io(e: std::io::Error) -> WatchError {
    WatchError::Notification(format!("smtp i/o: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_from_url_requires_from_and_to() {
        let url = ServiceUrl::parse("smtp://mail.example.com/?to=ops@example.com").unwrap();
        assert!(SmtpNotifier::from_url(&url).is_err());

        let url = ServiceUrl::parse("smtp://mail.example.com/?from=w@example.com").unwrap();
        assert!(SmtpNotifier::from_url(&url).is_err());

        let url = ServiceUrl::parse(
            "smtp://mail.example.com:587/?from=w@example.com&to=a@example.com,b@example.com",
        )
        .unwrap();
        let notifier = SmtpNotifier::from_url(&url).unwrap();
        assert_eq!(notifier.port, 587);
        assert_eq!(notifier.to.len(), 2);
    }

    /// Scripted SMTP server: replies in order, records everything received.
    async fn scripted_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            stream.write_all(b"220 test ESMTP\r\n").await.unwrap();

            let mut buf = [0u8; 4096];
            let replies: &[&[u8]] = &[
                b"250-test\r\n250 OK\r\n", // EHLO (multi-line)
                b"250 OK\r\n",             // MAIL FROM
                b"250 OK\r\n",             // RCPT TO
                b"354 go ahead\r\n",       // DATA
                b"250 queued\r\n",         // end of data
            ];
            for reply in replies {
                let n = stream.read(&mut buf).await.unwrap();
                received.push_str(&String::from_utf8_lossy(&buf[..n]));
                stream.write_all(reply).await.unwrap();
            }
            received
        });

        (addr, handle)
    }

    #[tokio::test]
    async fn test_send_conversation() {
        let (addr, server) = scripted_server().await;
        let url = ServiceUrl::parse(&format!(
            "smtp://{}:{}/?from=w@example.com&to=ops@example.com&subject=drift",
            addr.ip(),
            addr.port()
        ))
        .unwrap();
        let notifier = SmtpNotifier::from_url(&url).unwrap();

        notifier.send("container web updated").await.unwrap();

        let received = server.await.unwrap();
        assert!(received.contains("EHLO watchz"));
        assert!(received.contains("MAIL FROM:<w@example.com>"));
        assert!(received.contains("RCPT TO:<ops@example.com>"));
        assert!(received.contains("Subject: drift"));
        assert!(received.contains("container web updated"));
        assert!(received.contains("\r\n.\r\n"));
    }
}
