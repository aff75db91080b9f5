//! Full-screen chat loop: transcript pane, example-question sidebar, and an
//! input line, with questions answered on a background task so the interface
//! stays responsive.

use crate::agent::{run_cancellable, Agent};
use crate::core::config::RuntimeConfig;
use crate::core::message::{Transcript, EXAMPLE_QUESTIONS, ROLE_USER};
use crate::mcp::McpSession;
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

const HELP_TEXT: &str = "Commands:\n\
  /help          Show this help\n\
  /clear         Start a fresh conversation\n\
  /example <n>   Ask example question n from the sidebar\n\
  /quit, /exit   Leave\n\n\
Esc interrupts the question being answered. Ctrl+C quits.";

struct ChatApp {
    transcript: Transcript,
    input: String,
    in_flight: bool,
    cancel: Option<CancellationToken>,
    scroll_offset: u16,
    // Distance from top to the bottom-pinned position, recorded on each draw.
    max_scroll: u16,
    auto_scroll: bool,
}

impl ChatApp {
    fn new() -> Self {
        Self {
            transcript: Transcript::with_welcome(),
            input: String::new(),
            in_flight: false,
            cancel: None,
            scroll_offset: 0,
            max_scroll: 0,
            auto_scroll: true,
        }
    }

    fn scroll_up(&mut self) {
        self.auto_scroll = false;
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    /// Scrolling back down to the bottom re-pins the view there.
    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(1).min(self.max_scroll);
        if self.scroll_offset >= self.max_scroll {
            self.auto_scroll = true;
        }
    }
}

pub async fn run_chat(
    session: Arc<McpSession>,
    config: &RuntimeConfig,
) -> Result<(), Box<dyn Error>> {
    let agent = Arc::new(Mutex::new(Agent::new(session, config)?));

    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, agent).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    agent: Arc<Mutex<Agent>>,
) -> Result<(), Box<dyn Error>> {
    let mut app = ChatApp::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    loop {
        terminal.draw(|frame| draw_ui(frame, &mut app))?;

        // Answers arrive from the background task between key events.
        if let Ok(answer) = rx.try_recv() {
            app.transcript.push_assistant(answer);
            app.in_flight = false;
            app.cancel = None;
            app.auto_scroll = true;
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                break;
            }
            KeyCode::Esc => {
                if let Some(cancel) = &app.cancel {
                    cancel.cancel();
                }
            }
            KeyCode::Enter => {
                let line = app.input.trim().to_string();
                app.input.clear();
                if line.is_empty() {
                    continue;
                }
                match parse_input(&line) {
                    InputAction::Quit => break,
                    InputAction::Help => {
                        app.transcript.push_assistant(HELP_TEXT.to_string());
                        app.auto_scroll = true;
                    }
                    InputAction::Clear => {
                        if app.in_flight {
                            app.transcript.push_assistant(
                                "Finish or interrupt the current question first.".to_string(),
                            );
                        } else {
                            app.transcript.clear();
                            agent.lock().await.reset();
                            app.scroll_offset = 0;
                            app.auto_scroll = true;
                        }
                    }
                    InputAction::Unknown(command) => {
                        app.transcript.push_assistant(format!(
                            "Unknown command: {command}. Type /help for the list."
                        ));
                        app.auto_scroll = true;
                    }
                    InputAction::Ask(question) => {
                        submit_question(&mut app, &agent, &tx, question);
                    }
                }
            }
            KeyCode::Backspace => {
                app.input.pop();
            }
            KeyCode::Up => {
                app.scroll_up();
            }
            KeyCode::Down => {
                app.scroll_down();
            }
            KeyCode::Char(c) => {
                app.input.push(c);
            }
            _ => {}
        }
    }

    Ok(())
}

fn submit_question(
    app: &mut ChatApp,
    agent: &Arc<Mutex<Agent>>,
    tx: &mpsc::UnboundedSender<String>,
    question: String,
) {
    if app.in_flight {
        app.transcript
            .push_assistant("Still working on the previous question.".to_string());
        return;
    }

    app.transcript.push_user(question.clone());
    app.in_flight = true;
    app.auto_scroll = true;

    let token = CancellationToken::new();
    app.cancel = Some(token.clone());

    let agent = agent.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let answer = run_cancellable(&token, async {
            let mut agent = agent.lock().await;
            agent.ask(&question).await
        })
        .await;
        let _ = tx.send(answer);
    });
}

enum InputAction {
    Ask(String),
    Help,
    Clear,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> InputAction {
    if !line.starts_with('/') {
        return InputAction::Ask(line.to_string());
    }
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or(line);
    let rest = parts.next().unwrap_or("").trim();
    match command {
        "/help" => InputAction::Help,
        "/clear" => InputAction::Clear,
        "/quit" | "/exit" => InputAction::Quit,
        "/example" => match rest.parse::<usize>() {
            Ok(n) if (1..=EXAMPLE_QUESTIONS.len()).contains(&n) => {
                InputAction::Ask(EXAMPLE_QUESTIONS[n - 1].to_string())
            }
            _ => InputAction::Unknown(line.to_string()),
        },
        other => InputAction::Unknown(other.to_string()),
    }
}

fn draw_ui(frame: &mut Frame, app: &mut ChatApp) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(40), Constraint::Length(36)])
        .split(frame.area());

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(columns[0]);

    let lines = build_display_lines(&app.transcript, app.in_flight);

    // Pin the view to the bottom until the user scrolls up.
    let transcript_height = rows[0].height.saturating_sub(2);
    app.max_scroll = (lines.len() as u16).saturating_sub(transcript_height);
    if app.auto_scroll {
        app.scroll_offset = app.max_scroll;
    }
    let scroll = app.scroll_offset.min(app.max_scroll);

    let transcript = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Metascout"))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    frame.render_widget(transcript, rows[0]);

    let input = Paragraph::new(app.input.as_str()).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Ask (Enter to send, /help for commands)"),
    );
    frame.render_widget(input, rows[1]);
    frame.set_cursor_position((
        rows[1].x + 1 + app.input.chars().count() as u16,
        rows[1].y + 1,
    ));

    let mut sidebar_lines = Vec::new();
    for (index, question) in EXAMPLE_QUESTIONS.iter().enumerate() {
        sidebar_lines.push(Line::from(Span::styled(
            format!("{}. {question}", index + 1),
            Style::default().fg(Color::DarkGray),
        )));
        sidebar_lines.push(Line::from(""));
    }
    let sidebar = Paragraph::new(sidebar_lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Examples (/example <n>)"),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(sidebar, columns[1]);
}

fn build_display_lines(transcript: &Transcript, in_flight: bool) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    for msg in transcript.messages() {
        if msg.role == ROLE_USER {
            lines.push(Line::from(vec![
                Span::styled(
                    "You: ",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(msg.content.as_str(), Style::default().fg(Color::Cyan)),
            ]));
            lines.push(Line::from(""));
        } else {
            for content_line in msg.content.lines() {
                lines.push(Line::from(Span::styled(
                    content_line,
                    Style::default().fg(Color::White),
                )));
            }
            lines.push(Line::from(""));
        }
    }
    if in_flight {
        lines.push(Line::from(Span::styled(
            "Thinking...",
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines
}
