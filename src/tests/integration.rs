//! Integration tests: the engine driven through its outer surfaces
//!
//! These tests run the main loop the way the binary does:
//!   client → ncli block (Unix socket) → command protocol → block registry
//!   timers + descriptors → run_once / run_until

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    use crate::blocks::{self, HELLO, NCLI};
    use crate::config::EngineConfig;
    use crate::core::port::{Payload, PORT_STOP};
    use crate::core::{BlockId, BlockState};
    use crate::runtime::Manager;
    use crate::tests::example_blocks::{event_log, events_of, probe_factory, Event};

    fn manager() -> Manager {
        let config = EngineConfig {
            poll_timeout_ms: 5,
            ..Default::default()
        };
        let mut manager = Manager::with_config(config);
        blocks::register_builtin(manager.factories_mut());
        manager
    }

    /// Drive the loop until `done` holds or a second has passed
    fn spin_until(manager: &mut Manager, mut done: impl FnMut(&Manager) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            manager.run_once();
            if done(manager) {
                return true;
            }
        }
        false
    }

    /// Send one line and pump the loop until the reply arrives
    fn request(manager: &mut Manager, client: &mut BufReader<UnixStream>, line: &str) -> String {
        client.get_mut().write_all(format!("{}\n", line).as_bytes()).unwrap();
        client
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(5)))
            .unwrap();

        let mut reply = String::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            manager.run_once();
            match client.read_line(&mut reply) {
                Ok(n) if n > 0 && reply.ends_with('\n') => break,
                _ => continue,
            }
        }
        reply.trim_end().to_string()
    }

    // ====================================================================
    // Network configuration server
    // ====================================================================

    #[test]
    fn test_ncli_serves_text_and_structured_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");

        let mut manager = manager();
        manager.block_add(BlockId(-1), NCLI).unwrap();
        manager
            .block_conf(BlockId(-1), &format!("path={}", path.display()))
            .unwrap();
        manager.block_start(BlockId(-1)).unwrap();
        assert_eq!(manager.fd_count(), 1);

        let stream = UnixStream::connect(&path).unwrap();
        let mut client = BufReader::new(stream);
        assert!(spin_until(&mut manager, |m| m.fd_count() == 2));

        assert_eq!(
            request(&mut manager, &mut client, "0 1 hello"),
            "OK -1 ncli 1;1 hello 0;"
        );
        assert_eq!(
            request(&mut manager, &mut client, r#"{"cmd":"start","id":1}"#),
            "OK -1 ncli 1;1 hello 1;"
        );
        assert_eq!(
            request(&mut manager, &mut client, "6 1"),
            "KO -1 ncli 1;1 hello 1;"
        );

        // Disconnecting unregisters the client
        drop(client);
        assert!(spin_until(&mut manager, |m| m.fd_count() == 1));

        manager.block_stop(BlockId(-1)).unwrap();
        assert_eq!(manager.fd_count(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_ncli_refuses_to_stop_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");

        let mut manager = manager();
        manager.block_add(BlockId(-1), NCLI).unwrap();
        manager
            .block_conf(BlockId(-1), &format!("path={}", path.display()))
            .unwrap();
        manager.block_start(BlockId(-1)).unwrap();

        let stream = UnixStream::connect(&path).unwrap();
        let mut client = BufReader::new(stream);
        assert!(spin_until(&mut manager, |m| m.fd_count() == 2));

        assert_eq!(request(&mut manager, &mut client, "5 -1"), "KO -1 ncli 1;");
        assert_eq!(request(&mut manager, &mut client, "6 -1"), "KO -1 ncli 1;");
        assert_eq!(manager.block_get(BlockId(-1)).unwrap().state(), BlockState::Started);
        assert_eq!(manager.fd_count(), 2);
        assert!(path.exists());
    }

    #[test]
    fn test_ncli_without_path_stays_idle() {
        let mut manager = manager();
        manager.block_add(BlockId(-1), NCLI).unwrap();
        manager.block_start(BlockId(-1)).unwrap();

        assert_eq!(manager.fd_count(), 0);
        assert_eq!(
            manager.block_get(BlockId(-1)).and_then(|e| e.stats()).as_deref(),
            Some("clients=0 commands=0 failures=0")
        );
    }

    // ====================================================================
    // Main loop
    // ====================================================================

    #[test]
    fn test_run_once_fires_due_timers() {
        let log = event_log();
        let mut manager = manager();
        manager.block_factory_register("probe", probe_factory(&log, PORT_STOP));
        manager.block_add(BlockId(1), "probe").unwrap();
        manager
            .timer_add(BlockId(1), 1, Duration::from_millis(1), Payload::from("tick"))
            .unwrap();

        assert!(spin_until(&mut manager, |m| m.timer_count() == 0));
        assert_eq!(events_of(&log, 1), vec![Event::Timer(1, Payload::from("tick"))]);
    }

    #[test]
    fn test_run_until_honours_flag() {
        let mut manager = manager();
        let terminate = AtomicBool::new(true);
        manager.run_until(&terminate);
        assert!(terminate.load(Ordering::SeqCst));
    }

    #[test]
    fn test_configuration_then_traffic() {
        let mut manager = manager();
        manager
            .load_from_str(
                "0 1 hello\n0 2 hello\n2 2 second\n\
                 3 1 0:2\n3 1 1:2\n3 2 0:0\n3 2 1:0\n\
                 4 1\n4 2\n",
            )
            .unwrap();

        for _ in 0..2 {
            manager.process_rx(BlockId(1), 0, &mut Payload::from("data"));
        }

        let entry = manager.block_get(BlockId(2)).unwrap();
        assert_eq!(entry.state(), BlockState::Started);
        assert_eq!(entry.stats().as_deref(), Some("2"));
        assert_eq!(manager.conf_dump(), format!("1 {h} 1;2 {h} 1;", h = HELLO));
    }
}
