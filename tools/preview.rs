/// Preview: interactive shell for trying replies against the speech pipeline.
///
/// Usage: preview [--config <path>] [--chunk <n>]
///
/// Commands:
///   say <reply>         stream a reply in chunks and speak it
///   split <text>        show how text is cut, without speaking
///   chunk <n>           set the number of characters per streamed chunk
///   preset <a|b|c|d>    switch to a voice preset
///   voice <x> <y>       set voice parameters directly
///   log                 show the chat log
///   reset               clear the chat log
///   help                list commands
///   quit                exit

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use streamer_speech::core::config::StudioConfig;
use streamer_speech::core::conversation::{Conversation, Presenter};
use streamer_speech::core::ports::{
    AudioPayload, Avatar, AvatarError, ChatError, ChatStream, ChatStreamSource,
    SpeechSynthesizer, SynthesisError,
};
use streamer_speech::core::splitter::{SentenceSplitter, Split};
use streamer_speech::core::tag::{parse_leading_tag, TagMatch};
use streamer_speech::schema::emotion::Emotion;
use streamer_speech::schema::message::Message;
use streamer_speech::schema::screenplay::{Talk, VoiceParams};

/// Plays back whatever reply was typed, split into fixed-size chunks.
struct ScriptedReply {
    reply: Mutex<String>,
    chunk_chars: usize,
}

#[async_trait]
impl ChatStreamSource for ScriptedReply {
    async fn open(&self, _messages: &[Message], _credential: &str) -> Result<ChatStream, ChatError> {
        let reply = self
            .reply
            .lock()
            .map_err(|_| ChatError::Request("reply script unavailable".to_string()))?
            .clone();
        let chars: Vec<char> = reply.chars().collect();
        let chunks: Vec<Result<String, ChatError>> = chars
            .chunks(self.chunk_chars.max(1))
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(stream::iter(chunks)
            .then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                chunk
            })
            .boxed())
    }
}

struct ConsoleSynth;

#[async_trait]
impl SpeechSynthesizer for ConsoleSynth {
    async fn synthesize(&self, talk: &Talk) -> Result<AudioPayload, SynthesisError> {
        println!(
            "  synth  {:?} ({:.1}, {:.1}) {}",
            talk.style, talk.speaker_x, talk.speaker_y, talk.message
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(AudioPayload::Raw(talk.message.clone().into_bytes()))
    }
}

struct ConsoleAvatar;

#[async_trait]
impl Avatar for ConsoleAvatar {
    async fn load_model(&self, source: &str) -> Result<(), AvatarError> {
        println!("  model  {}", source);
        Ok(())
    }

    async fn apply_expression(&self, emotion: Emotion) -> Result<(), AvatarError> {
        println!("  face   {}", emotion);
        Ok(())
    }

    async fn play_audio_with_lip_sync(&self, audio: &[u8]) -> Result<(), AvatarError> {
        let text = String::from_utf8_lossy(audio);
        println!("  play   {}", text);
        tokio::time::sleep(Duration::from_millis(25 * text.chars().count() as u64)).await;
        Ok(())
    }
}

struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn show_assistant_message(&self, text: &str) {
        println!("  shown  {}", text.replace('\n', " "));
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = None;
    let mut chunk_chars: usize = 3;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return;
            }
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--chunk" if i + 1 < args.len() => {
                i += 1;
                chunk_chars = args[i].parse().unwrap_or(3);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = match config_path {
        Some(ref path) => match StudioConfig::load_from_ron(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ERROR: Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => StudioConfig::default(),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ERROR: Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let splitter = match SentenceSplitter::new(config.split.rules()) {
        Ok(splitter) => splitter,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let mut conversation = match Conversation::builder()
        .config(config)
        .credential("preview")
        .synthesizer(Arc::new(ConsoleSynth))
        .avatar(Arc::new(ConsoleAvatar))
        .presenter(Arc::new(ConsolePresenter))
        .build()
    {
        Ok(conversation) => conversation,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    println!("Chunk size: {} characters", chunk_chars);
    println!("Type 'help' for commands.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "say" => {
                if rest.is_empty() {
                    println!("Usage: say <reply>");
                    continue;
                }
                let source = ScriptedReply {
                    reply: Mutex::new(rest.replace("\\n", "\n")),
                    chunk_chars,
                };
                match runtime.block_on(conversation.run_turn("(preview)", &source)) {
                    Ok(outcome) => {
                        println!("\n--- Turn ---");
                        println!("Transcript: {}", outcome.transcript);
                        println!(
                            "Units: {} played, {} skipped",
                            outcome.report.played(),
                            outcome.report.skipped()
                        );
                        if let Some(tail) = outcome.discarded_tail {
                            println!("Discarded tail: {:?}", tail);
                        }
                        println!("--- End ---\n");
                    }
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "split" => {
                print_split(&splitter, &rest.replace("\\n", "\n"));
            }
            "chunk" => match rest.parse::<usize>() {
                Ok(n) if n > 0 => {
                    chunk_chars = n;
                    println!("Chunk size: {}", n);
                }
                _ => println!("Usage: chunk <n> (n > 0)"),
            },
            "preset" => {
                let preset = match rest.to_lowercase().as_str() {
                    "a" => VoiceParams::PRESET_A,
                    "b" => VoiceParams::PRESET_B,
                    "c" => VoiceParams::PRESET_C,
                    "d" => VoiceParams::PRESET_D,
                    _ => {
                        println!("Usage: preset <a|b|c|d>");
                        continue;
                    }
                };
                conversation.set_voice(preset);
                print_voice(conversation.voice());
            }
            "voice" => {
                let values: Vec<f32> = rest
                    .split_whitespace()
                    .filter_map(|v| v.parse().ok())
                    .collect();
                if values.len() != 2 {
                    println!("Usage: voice <x> <y>");
                    continue;
                }
                conversation.set_voice(VoiceParams::new(values[0], values[1]));
                print_voice(conversation.voice());
            }
            "log" => {
                for (i, message) in conversation.display_log().iter().enumerate() {
                    println!("{:>3} {:<9} {}", i, message.role.as_str(), message.content);
                }
            }
            "reset" => {
                conversation.reset_chat_log();
                println!("Chat log cleared.");
            }
            _ => println!("Unknown command: {}. Type 'help' for commands.", cmd),
        }
    }
}

fn print_split(splitter: &SentenceSplitter, text: &str) {
    let mut buffer = text.to_string();
    loop {
        match parse_leading_tag(&buffer) {
            TagMatch::Emotion { emotion, rest } => {
                println!("  tag    {}", emotion);
                buffer = rest.to_string();
            }
            TagMatch::Unrecognized { name } => println!("  tag?   [{}] (not an emotion)", name),
            TagMatch::None => {}
        }
        match splitter.split_next(&buffer) {
            Split::Match {
                text,
                rest,
                speakable,
            } => {
                let marker = if speakable { "unit" } else { "skip" };
                println!("  {:<6} {:?}", marker, text);
                buffer = rest.to_string();
            }
            Split::NoMatch => break,
        }
    }
    if !buffer.is_empty() {
        println!("  tail   {:?}", buffer);
    }
}

fn print_voice(voice: VoiceParams) {
    println!("Voice: x={:.1} y={:.1}", voice.speaker_x, voice.speaker_y);
}

fn print_usage() {
    println!("Usage: preview [--config <path>] [--chunk <n>]");
    println!();
    println!("Interactive shell for trying replies against the speech pipeline.");
    println!("Use \\n inside a reply to type a line break.");
}

fn print_help() {
    println!("Commands:");
    println!("  say <reply>        Stream a reply in chunks and speak it");
    println!("  split <text>       Show how text is cut, without speaking");
    println!("  chunk <n>          Set characters per streamed chunk");
    println!("  preset <a|b|c|d>   Switch to a voice preset");
    println!("  voice <x> <y>      Set voice parameters (-10..10)");
    println!("  log                Show the chat log");
    println!("  reset              Clear the chat log");
    println!("  help               Show this help");
    println!("  quit               Exit");
}
