//! Live reveal TUI - terminal rendition of the public results screen
//!
//! Subscribes to the retained display topic and shows:
//! - Group name and theme, or a waiting message when nothing is scheduled
//! - The average with a local count-up animation and the vote count
//! - The "thank you" label during a reveal
//! - The most recent voters

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use live_reveal::domain::{CountUp, Direction as Trend, DisplayFrame, RevealPhase};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Row, Table},
    Frame, Terminal,
};
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Live reveal TUI
#[derive(Parser, Debug)]
#[command(name = "live-reveal-tui", version, about)]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,
    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,
    /// Display topic published by the live-reveal service
    #[arg(long, default_value = "live/display")]
    topic: String,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
}

/// Average shown `elapsed` into a count-up, eased out
fn animated_value(count_up: &CountUp, elapsed: Duration) -> f64 {
    let from = f64::from(count_up.from);
    let to = f64::from(count_up.to);
    if count_up.duration_ms == 0 {
        return to;
    }
    let progress = (elapsed.as_millis() as f64 / count_up.duration_ms as f64).min(1.0);
    let eased = 1.0 - (1.0 - progress).powi(3);
    from + (to - from) * eased
}

struct ScreenState {
    connected: bool,
    frame: Option<DisplayFrame>,
    /// Count-up in progress and when it started
    animation: Option<(CountUp, Instant)>,
    last_message: Option<Instant>,
}

impl ScreenState {
    fn new() -> Self {
        Self { connected: false, frame: None, animation: None, last_message: None }
    }

    fn apply(&mut self, frame: DisplayFrame) {
        self.last_message = Some(Instant::now());
        // Keep a running animation across the label-clear frame
        match frame.count_up {
            Some(count_up) => self.animation = Some((count_up, Instant::now())),
            None if frame.group.is_none() || frame.phase == RevealPhase::Suspense => self.animation = None,
            None => {}
        }
        self.frame = Some(frame);
    }

    fn shown_average(&self) -> Option<f64> {
        let frame = self.frame.as_ref()?;
        if let Some((count_up, started)) = &self.animation {
            if count_up.to == frame.average {
                return Some(animated_value(count_up, started.elapsed()));
            }
        }
        Some(f64::from(frame.average))
    }
}

type SharedState = Arc<Mutex<ScreenState>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let state = Arc::new(Mutex::new(ScreenState::new()));

    let mqtt_state = state.clone();
    let mqtt_handle = tokio::spawn(async move {
        run_mqtt_subscriber(args, mqtt_state).await;
    });

    let result = run_ui(&mut terminal, state).await;

    mqtt_handle.abort();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

async fn run_mqtt_subscriber(args: Args, state: SharedState) {
    let client_id = format!("live-reveal-tui-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, &args.host, args.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_clean_session(true);

    if let (Some(user), Some(pass)) = (&args.username, &args.password) {
        mqttoptions.set_credentials(user, pass);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

    loop {
        match eventloop.poll().await {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                // Subscribe on every connect; the retained frame arrives right after
                let _ = client.try_subscribe(&args.topic, QoS::AtLeastOnce);
                state.lock().await.connected = true;
            }
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                if let Ok(frame) = serde_json::from_slice::<DisplayFrame>(&publish.payload) {
                    state.lock().await.apply(frame);
                }
            }
            Ok(_) => {}
            Err(_) => {
                state.lock().await.connected = false;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error>> {
    // Fast enough for a smooth count-up
    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    loop {
        let s = state.lock().await;
        terminal.draw(|f| draw_ui(f, &s))?;
        drop(s);

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
}

fn draw_ui(f: &mut Frame, state: &ScreenState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(9), // Average
            Constraint::Min(0),    // Voters
        ])
        .split(f.area());

    draw_header(f, chunks[0], state);

    match state.frame.as_ref() {
        Some(frame) if frame.group.is_some() => {
            draw_average(f, chunks[1], state, frame);
            draw_voters(f, chunks[2], frame);
        }
        _ => draw_waiting(f, chunks[1]),
    }
}

fn draw_header(f: &mut Frame, area: Rect, state: &ScreenState) {
    let status_color = if state.connected { Color::Green } else { Color::Red };
    let status_text = if state.connected { "CONNECTED" } else { "DISCONNECTED" };

    let group = state
        .frame
        .as_ref()
        .and_then(|frame| frame.group.as_ref())
        .map(|g| if g.theme.is_empty() { g.name.clone() } else { format!("{} - {}", g.name, g.theme) })
        .unwrap_or_else(|| "-".to_string());

    let last_msg = state
        .last_message
        .map(|t| format!("{}s ago", t.elapsed().as_secs()))
        .unwrap_or_else(|| "never".to_string());

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Live Reveal ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw(" | "),
        Span::styled(group, Style::default().fg(Color::Yellow)),
        Span::raw(" | Last: "),
        Span::raw(last_msg),
        Span::raw(" | Press 'q' to quit"),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn draw_waiting(f: &mut Frame, area: Rect) {
    let waiting = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(
            "Please wait for the next performance",
            Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
        )),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(waiting, area);
}

fn draw_average(f: &mut Frame, area: Rect, state: &ScreenState, frame: &DisplayFrame) {
    let (arrow, arrow_color) = match frame.direction {
        Trend::Increasing => ("▲", Color::Green),
        Trend::Decreasing => ("▼", Color::Red),
        Trend::Unchanged => ("•", Color::Gray),
    };

    let average = if frame.suspense_active {
        Span::styled("?.?", Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD | Modifier::SLOW_BLINK))
    } else {
        let value = state.shown_average().unwrap_or_default();
        Span::styled(format!("{value:.1}"), Style::default().fg(Color::White).add_modifier(Modifier::BOLD))
    };

    let label = match (&frame.pending_participant_name, frame.suspense_active) {
        (Some(name), true) => Line::from(Span::styled(
            format!("{name} has voted..."),
            Style::default().fg(Color::Magenta),
        )),
        (Some(name), false) => Line::from(Span::styled(
            format!("Thank you, {name}!"),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        (None, _) => Line::from(""),
    };

    let lines = vec![
        Line::from(""),
        Line::from(vec![average, Span::raw("  "), Span::styled(arrow, Style::default().fg(arrow_color))]),
        Line::from(""),
        Line::from(format!("{} votes", frame.count)),
        Line::from(""),
        label,
    ];

    let panel = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().title(" Average ").borders(Borders::ALL));
    f.render_widget(panel, area);
}

fn draw_voters(f: &mut Frame, area: Rect, frame: &DisplayFrame) {
    let rows: Vec<Row> = frame
        .voters
        .iter()
        .map(|voter| Row::new(vec![voter.name.clone(), voter.rating.to_string()]))
        .collect();

    let table = Table::new(rows, [Constraint::Percentage(80), Constraint::Percentage(20)])
        .header(Row::new(vec!["Voter", "Rating"]).style(Style::default().add_modifier(Modifier::BOLD)))
        .block(
            Block::default()
                .title(" Recent votes ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Green)),
        );
    f.render_widget(table, area);
}
