use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::cli::SessionArgs;
use crate::client::AnnotatorApi;
use crate::commands::random::write_preview;
use crate::config::ClientConfig;
use crate::model::{ContextKind, TopicSet};
use crate::workflow::answer::{AnswerParam, AnswerView, Side};
use crate::workflow::controller::{Controller, WorkflowError};
use crate::workflow::focus::FocusTarget;
use crate::workflow::state::TopicInput;
use crate::workflow::view::{CardRef, JudgmentField, render_panel_header};
use crate::workflow::viewer::Dismissal;

const HELP: &str = "\
commands:
  topics [curated|manual]      load a topic list
  pick N                       choose topic N from the list
  type TEXT                    enter a free-text topic
  random [document|image]      show random context
  search [TEXT]                search the current topic
  show                         print all panels
  focus P C [completeness]     focus a judgment control
  GRADE | <empty line>         set the focused control, then move on
  set P C REL COMP             set both judgments of a card
  view P C                     enlarge the card's image
  close [control|background]   close the image viewer
  evaluate                     store judgments and fetch NDCG
  export PATH                  write the judged batch as json
  answer top-n N | ndcg K      generate answers
  rate left|right REL FAITH    rate a candidate answer (1-5)
  save-answers | save-query    persist ratings or the query
  state                        show the workflow state
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Help,
    Topics(TopicSet),
    Pick(usize),
    Type(String),
    Random(ContextKind),
    Search(Option<String>),
    Show,
    Focus(FocusTarget),
    Enter(Option<String>),
    Set {
        card: CardRef,
        relevance: String,
        completeness: String,
    },
    View(CardRef),
    Close(Dismissal),
    Evaluate,
    Export(PathBuf),
    Answer(AnswerParam),
    Rate {
        side: Side,
        relevance: u8,
        faithfulness: u8,
    },
    SaveAnswers,
    SaveQuery,
    State,
    Quit,
}

pub async fn run(config: &ClientConfig, args: SessionArgs) -> Result<()> {
    let api = AnnotatorApi::new(config).context("failed to build http client")?;
    let (mut controller, mut events) = Controller::new(api, config.clone());
    info!(server_url = %config.server_url, panels = config.panels.len(), "session started");
    emit("type `help` for commands")?;

    if let Some(set) = args.preload_topics {
        report(&mut controller, SessionCommand::Topics(set)).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let Some(text) = controller.render_event(event) {
                    emit(&text)?;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        emit(&message)?;
                        continue;
                    }
                };
                if command == SessionCommand::Quit {
                    break;
                }
                report(&mut controller, command).await?;
            }
        }
    }

    info!(state = controller.state().as_str(), "session ended");
    Ok(())
}

async fn report(controller: &mut Controller, command: SessionCommand) -> Result<()> {
    match execute(controller, command).await {
        Ok(text) if text.is_empty() => Ok(()),
        Ok(text) => emit(&text),
        Err(err) => {
            emit(&format!("error: {err}"))?;
            if let Some(notice) = controller.notice() {
                emit(&format!("notice: {notice}"))?;
            }
            Ok(())
        }
    }
}

fn emit(text: &str) -> Result<()> {
    let mut output = io::stdout().lock();
    writeln!(output, "{text}")?;
    output.flush()?;
    Ok(())
}

pub fn parse_command(line: &str) -> Result<SessionCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(SessionCommand::Enter(None));
    }
    if line.parse::<i64>().is_ok() {
        return Ok(SessionCommand::Enter(Some(line.to_string())));
    }

    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(word, rest)| (word, rest.trim()));
    let args = rest.split_whitespace().collect::<Vec<&str>>();

    let command = match word.to_ascii_lowercase().as_str() {
        "help" | "?" => SessionCommand::Help,
        "topics" => SessionCommand::Topics(parse_enum(args.first().copied(), TopicSet::Curated)?),
        "pick" => SessionCommand::Pick(parse_position(args.first().copied(), "topic")?),
        "type" => SessionCommand::Type(rest.to_string()),
        "random" => SessionCommand::Random(parse_enum(args.first().copied(), ContextKind::Document)?),
        "search" => SessionCommand::Search((!rest.is_empty()).then(|| rest.to_string())),
        "show" => SessionCommand::Show,
        "focus" => {
            let card = parse_card(&args)?;
            let field = match args.get(2).copied() {
                None | Some("relevance") => JudgmentField::Relevance,
                Some("completeness") => JudgmentField::Completeness,
                Some(other) => return Err(format!("unknown control {other:?}")),
            };
            SessionCommand::Focus(FocusTarget { card, field })
        }
        "set" => {
            let card = parse_card(&args)?;
            let [_, _, relevance, completeness] = args.as_slice() else {
                return Err("usage: set P C REL COMP".to_string());
            };
            SessionCommand::Set {
                card,
                relevance: relevance.to_string(),
                completeness: completeness.to_string(),
            }
        }
        "view" => SessionCommand::View(parse_card(&args)?),
        "close" => SessionCommand::Close(match args.first().copied() {
            None | Some("control") => Dismissal::Control,
            Some("background") => Dismissal::Background,
            Some(other) => return Err(format!("unknown dismissal {other:?}")),
        }),
        "evaluate" => SessionCommand::Evaluate,
        "export" => {
            if rest.is_empty() {
                return Err("usage: export PATH".to_string());
            }
            SessionCommand::Export(PathBuf::from(rest))
        }
        "answer" => {
            let [kind, value] = args.as_slice() else {
                return Err("usage: answer top-n N | ndcg K".to_string());
            };
            SessionCommand::Answer(AnswerParam::parse(kind, value).map_err(|err| err.to_string())?)
        }
        "rate" => {
            let [side, relevance, faithfulness] = args.as_slice() else {
                return Err("usage: rate left|right REL FAITH".to_string());
            };
            SessionCommand::Rate {
                side: Side::parse(side).ok_or_else(|| format!("unknown side {side:?}"))?,
                relevance: parse_rating(relevance)?,
                faithfulness: parse_rating(faithfulness)?,
            }
        }
        "save-answers" => SessionCommand::SaveAnswers,
        "save-query" => SessionCommand::SaveQuery,
        "state" => SessionCommand::State,
        "quit" | "exit" => SessionCommand::Quit,
        other => return Err(format!("unknown command {other:?}; type help")),
    };
    Ok(command)
}

fn parse_enum<T: ValueEnum>(raw: Option<&str>, default: T) -> Result<T, String> {
    match raw {
        None => Ok(default),
        Some(raw) => T::from_str(raw, true),
    }
}

// One-based on screen, zero-based in the view model.
fn parse_position(raw: Option<&str>, what: &str) -> Result<usize, String> {
    let raw = raw.ok_or_else(|| format!("missing {what} number"))?;
    match raw.parse::<usize>() {
        Ok(position) if position > 0 => Ok(position - 1),
        _ => Err(format!("{what} number must be 1 or more, got {raw:?}")),
    }
}

fn parse_card(args: &[&str]) -> Result<CardRef, String> {
    Ok(CardRef {
        panel: parse_position(args.first().copied(), "panel")?,
        card: parse_position(args.get(1).copied(), "card")?,
    })
}

fn parse_rating(raw: &str) -> Result<u8, String> {
    raw.parse::<u8>()
        .map_err(|_| format!("rating must be a number, got {raw:?}"))
}

fn describe_focus(target: Option<FocusTarget>) -> String {
    match target {
        Some(target) => format!(
            "focus: panel {} card {} {}",
            target.card.panel + 1,
            target.card.card + 1,
            target.field.as_str()
        ),
        None => "focus: none".to_string(),
    }
}

async fn execute(controller: &mut Controller, command: SessionCommand) -> Result<String, WorkflowError> {
    let text = match command {
        SessionCommand::Help => HELP.to_string(),
        SessionCommand::Topics(set) => {
            let topics = controller.fetch_topics(set).await?;
            if topics.is_empty() {
                format!("no {} topics", set.as_str())
            } else {
                topics
                    .iter()
                    .enumerate()
                    .map(|(idx, topic)| format!("{:>3}. {topic}", idx + 1))
                    .collect::<Vec<String>>()
                    .join("\n")
            }
        }
        SessionCommand::Pick(index) => format!("topic: {}", controller.select_topic(index)?),
        SessionCommand::Type(text) => {
            controller.type_topic(&text)?;
            format!("topic: {text}")
        }
        SessionCommand::Random(kind) => {
            let preview = controller.random_context(kind).await?;
            let mut buffer = Vec::new();
            write_preview(&mut buffer, &preview)
                .map_err(|err| WorkflowError::Output(err.to_string()))?;
            String::from_utf8_lossy(&buffer).trim_end().to_string()
        }
        SessionCommand::Search(topic) => {
            if let Some(topic) = topic {
                controller.type_topic(&topic)?;
            }
            let summary = controller.search().await?;
            format!(
                "{} documents for {:?}",
                summary.cards, summary.query
            )
        }
        SessionCommand::Show => controller
            .render_results()
            .unwrap_or_else(|| "no results".to_string()),
        SessionCommand::Focus(target) => {
            controller.focus(target)?;
            describe_focus(controller.focused())
        }
        SessionCommand::Enter(grade) => describe_focus(controller.enter(grade.as_deref())?),
        SessionCommand::Set {
            card,
            relevance,
            completeness,
        } => {
            let relevance = controller.set_grade(card, JudgmentField::Relevance, &relevance)?;
            let completeness =
                controller.set_grade(card, JudgmentField::Completeness, &completeness)?;
            format!(
                "panel {} card {}: relevance={relevance} completeness={completeness}",
                card.panel + 1,
                card.card + 1
            )
        }
        SessionCommand::View(card) => {
            let overlay = controller.open_viewer(card)?;
            format!(
                "image {}x{} on the {} half: {}\n{}",
                overlay.width,
                overlay.height,
                overlay.side.as_str(),
                overlay.path.display(),
                describe_focus(controller.focused())
            )
        }
        SessionCommand::Close(dismissal) => match controller.close_viewer(dismissal) {
            Some(_) => "viewer closed".to_string(),
            None => "viewer is not open".to_string(),
        },
        SessionCommand::Evaluate => {
            let summary = controller.evaluate().await?;
            let mut lines = vec![format!(
                "stored {} documents, {} ndcg scores",
                summary.documents, summary.scores
            )];
            if let Some(view) = controller.results() {
                lines.extend(view.panels.iter().map(render_panel_header));
            }
            lines.join("\n")
        }
        SessionCommand::Export(path) => {
            let documents = controller.export_batch(&path)?;
            format!("exported {documents} documents to {}", path.display())
        }
        SessionCommand::Answer(param) => {
            let text = controller.generate_answer(param).await?.render_text();
            match controller.answer_page() {
                Some(page) => format!("{text}\npage: {}", page.display()),
                None => text,
            }
        }
        SessionCommand::Rate {
            side,
            relevance,
            faithfulness,
        } => {
            controller.rate_answer(side, relevance, faithfulness)?;
            format!("rated {} answer", side.as_str())
        }
        SessionCommand::SaveAnswers => controller
            .save_answers()
            .await?
            .message
            .unwrap_or_else(|| "answer ratings saved".to_string()),
        SessionCommand::SaveQuery => controller
            .save_query()
            .await?
            .message
            .unwrap_or_else(|| "query saved".to_string()),
        SessionCommand::State => {
            let mut text = format!(
                "state: {}\ntopic: {}",
                controller.state().as_str(),
                controller.topic_input().current_topic().unwrap_or("-")
            );
            if let TopicInput::Selection { set, topics, .. } = controller.topic_input() {
                text.push_str(&format!("\ntopic list: {} ({} topics)", set.as_str(), topics.len()));
            }
            if let Some(session) = controller.session() {
                text.push_str(&format!(
                    "\nsearch: {:?} (cycle {})",
                    session.topic, session.generation
                ));
            }
            if let Some(overlay) = controller.overlay() {
                text.push_str(&format!(
                    "\nviewer: panel {} card {} open",
                    overlay.card.panel + 1,
                    overlay.card.card + 1
                ));
            }
            if !matches!(controller.answer(), AnswerView::Empty) {
                text.push_str(&format!("\nanswer:\n{}", controller.answer().render_text()));
            }
            if let Some(notice) = controller.notice() {
                text.push_str(&format!("\nnotice: {notice}"));
            }
            text
        }
        SessionCommand::Quit => String::new(),
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_grades_and_empty_lines_are_enter() {
        assert_eq!(parse_command(""), Ok(SessionCommand::Enter(None)));
        assert_eq!(
            parse_command(" -1 "),
            Ok(SessionCommand::Enter(Some("-1".to_string())))
        );
    }

    #[test]
    fn positions_are_one_based() {
        assert_eq!(
            parse_command("focus 2 3 completeness"),
            Ok(SessionCommand::Focus(FocusTarget {
                card: CardRef { panel: 1, card: 2 },
                field: JudgmentField::Completeness
            }))
        );
        assert!(parse_command("view 0 1").is_err());
        assert_eq!(parse_command("pick 1"), Ok(SessionCommand::Pick(0)));
    }

    #[test]
    fn set_requires_both_grades() {
        assert_eq!(
            parse_command("set 1 2 3 -1"),
            Ok(SessionCommand::Set {
                card: CardRef { panel: 0, card: 1 },
                relevance: "3".to_string(),
                completeness: "-1".to_string()
            })
        );
        assert!(parse_command("set 1 2 3").is_err());
    }

    #[test]
    fn answer_parameter_is_validated_before_any_request() {
        assert_eq!(
            parse_command("answer ndcg 2"),
            Ok(SessionCommand::Answer(AnswerParam::NdcgCutoff(2)))
        );
        assert_eq!(
            parse_command("answer ndcg 9"),
            Err("ndcg must be between 1 and 3, got 9".to_string())
        );
        assert!(parse_command("answer top-n").is_err());
    }

    #[test]
    fn free_text_keeps_inner_spacing() {
        assert_eq!(
            parse_command("type  solar  panels "),
            Ok(SessionCommand::Type("solar  panels".to_string()))
        );
        assert_eq!(
            parse_command("search wind power"),
            Ok(SessionCommand::Search(Some("wind power".to_string())))
        );
        assert_eq!(
            parse_command("topics manual"),
            Ok(SessionCommand::Topics(TopicSet::Manual))
        );
        assert_eq!(
            parse_command("rate R 5 4"),
            Ok(SessionCommand::Rate {
                side: Side::Right,
                relevance: 5,
                faithfulness: 4
            })
        );
        assert!(parse_command("frobnicate").is_err());
    }
}
