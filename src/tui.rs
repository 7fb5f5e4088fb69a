use anyhow::Result;
use crossbeam_channel::{tick, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Stylize,
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Paragraph, Widget},
    DefaultTerminal, Frame,
};
use std::time::{Duration, Instant};

use crate::machine::{Command, RunMode};
use crate::runner::Snapshot;

#[derive(Debug)]
pub struct StatusPanel {
    pub topic: String,
    pub snapshot: Option<Snapshot>,
    pub t_begin: Instant,
    pub run_duration: Option<Duration>,
    pub exit: Option<PanelExit>,
    commands: Sender<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelExit {
    Quit,
    Timeout,
}

impl StatusPanel {
    pub fn new(topic: &str, commands: Sender<Command>, run_duration: Option<Duration>) -> Self {
        Self {
            topic: topic.to_string(),
            snapshot: None,
            t_begin: Instant::now(),
            run_duration,
            exit: None,
            commands,
        }
    }

    pub fn run(
        &mut self,
        terminal: &mut DefaultTerminal,
        snapshots: &Receiver<Snapshot>,
    ) -> Result<PanelExit> {
        let ticker = tick(Duration::from_millis(250));
        self.t_begin = Instant::now();

        while self.exit.is_none() {
            let _ = ticker.recv();

            while let Ok(snapshot) = snapshots.try_recv() {
                self.snapshot = Some(snapshot);
            }

            self.handle_events()?;

            if self
                .run_duration
                .is_some_and(|d| self.t_begin.elapsed() >= d)
            {
                self.exit = Some(PanelExit::Timeout);
            }

            terminal.draw(|f| self.draw(f))?;
        }
        Ok(self.exit.unwrap_or(PanelExit::Quit))
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        if event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                    self.handle_key_event(key_event)
                }
                _ => {}
            };
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        let cmd = match key_event.code {
            KeyCode::Char('q') => {
                self.exit = Some(PanelExit::Quit);
                return;
            }
            KeyCode::Char(' ') => Command::Toggle,
            KeyCode::Char('a') => Command::Arm,
            KeyCode::Char('h') => Command::Halt,
            KeyCode::Char('m') => {
                let mode = self.snapshot.as_ref().map_or(RunMode::Single, |s| s.run_mode);
                Command::SetRunMode(match mode {
                    RunMode::Single => RunMode::Continuous,
                    RunMode::Continuous => RunMode::Single,
                })
            }
            _ => return,
        };
        if self.commands.send(cmd).is_err() {
            self.exit = Some(PanelExit::Quit);
        }
    }
}

impl Widget for &StatusPanel {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(format!(" {} Trigger ", self.topic).bold());
        let instructions = Line::from(vec![
            " Arm/Halt ".into(),
            "<Space>".blue().bold(),
            " Mode ".into(),
            "<M>".blue().bold(),
            " Quit ".into(),
            "<Q> ".blue().bold(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);

        let elapsed = self.t_begin.elapsed().as_secs().to_string();
        let lines = match &self.snapshot {
            None => vec![Line::from(vec![
                "Waiting for samples, elapsed ".into(),
                elapsed.yellow(),
                " s".into(),
            ])],
            Some(s) => vec![
                Line::from(vec![
                    "Status: ".into(),
                    s.status.to_string().yellow(),
                    " Mode: ".into(),
                    s.run_mode.to_string().yellow(),
                    " Elapsed: ".into(),
                    elapsed.yellow(),
                    " s".into(),
                ]),
                Line::from(vec![
                    "Sample rate: ".into(),
                    format!("{:.0}", s.sample_rate).yellow(),
                    " S/s".into(),
                    " Clock: ".into(),
                    s.clock
                        .map_or("-".to_string(), |c| format!("{c:.3}"))
                        .yellow(),
                    " s".into(),
                    " Buffered: ".into(),
                    s.buffered.to_string().yellow(),
                ]),
                Line::from(vec![
                    "Arms: ".into(),
                    s.stats.arms.to_string().yellow(),
                    " Starts: ".into(),
                    s.stats.start_matches.to_string().yellow(),
                    " Stops: ".into(),
                    s.stats.stop_matches.to_string().yellow(),
                    " Halts: ".into(),
                    s.stats.halts.to_string().yellow(),
                    " Anomalies: ".into(),
                    s.stats.anomalies.to_string().yellow(),
                ]),
                Line::from(vec![
                    "GPO: ".into(),
                    format!("0x{:02x}", s.gpo_mask).yellow(),
                    " Captures: ".into(),
                    s.captures.to_string().yellow(),
                ]),
                Line::from(vec![
                    "Last: ".into(),
                    s.last_event.clone().unwrap_or_default().yellow(),
                ]),
            ],
        };

        Paragraph::new(Text::from(lines))
            .centered()
            .block(block)
            .render(area, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Status, TriggerStats};
    use crossbeam_channel::unbounded;
    use crossterm::event::KeyModifiers;

    fn snapshot() -> Snapshot {
        Snapshot {
            status: Status::Searching,
            run_mode: RunMode::Continuous,
            stats: TriggerStats {
                arms: 2,
                ..TriggerStats::default()
            },
            sample_rate: 1000.0,
            clock: Some(1.25),
            gpo_mask: 0x82,
            buffered: 10,
            captures: 1,
            last_event: Some("armed".to_string()),
        }
    }

    fn rendered(panel: &StatusPanel) -> String {
        let area = Rect::new(0, 0, 90, 9);
        let mut buf = Buffer::empty(area);
        panel.render(area, &mut buf);
        buf.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn renders_snapshot() {
        let (tx, _rx) = unbounded();
        let mut panel = StatusPanel::new("js220/trigger", tx, None);
        assert!(rendered(&panel).contains("Waiting for samples"));
        panel.snapshot = Some(snapshot());
        let text = rendered(&panel);
        assert!(text.contains("js220/trigger Trigger"));
        assert!(text.contains("searching"));
        assert!(text.contains("0x82"));
        assert!(text.contains("1.250"));
    }

    #[test]
    fn keys_send_commands() {
        let (tx, rx) = unbounded();
        let mut panel = StatusPanel::new("js220/trigger", tx, None);
        panel.snapshot = Some(snapshot());
        let key = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE);

        panel.handle_key_event(key(' '));
        panel.handle_key_event(key('m'));
        panel.handle_key_event(key('x'));
        assert_eq!(rx.try_recv().unwrap(), Command::Toggle);
        assert_eq!(rx.try_recv().unwrap(), Command::SetRunMode(RunMode::Single));
        assert!(rx.try_recv().is_err());
        assert!(panel.exit.is_none());

        panel.handle_key_event(key('q'));
        assert_eq!(panel.exit, Some(PanelExit::Quit));
    }
}
