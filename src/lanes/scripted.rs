//! Scripted lane.
//!
//! Compiles each scenario to a directive program ("tape") for the external
//! headless terminal recorder, one tape per scenario, then composes the
//! per-scene videos into final media with the compositor. Regex assertions
//! are evaluated after recording against the recorder's ASCII text capture.
//!
//! With pinned settings, tape generation is a pure function of the
//! screenplay: two runs of the same document produce byte-identical tapes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use minijinja::{Environment, context};

use crate::artifacts::{FailureBundle, RunStatus, ScenarioOutcome};
use crate::error::StudioError;
use crate::evaluator::{self, Snapshot};
use crate::screenplay::{Action, ActionKind, Scenario, Screenplay, WaitMode};
use crate::shell_exec;

use super::{LaneResult, MediaFormat, Playback, RunContext, run_command_list, run_preinstall};

pub const LANE_NAME: &str = "scripted";

/// Tape header template. The directive body is appended line by line - the
/// template carries the settings block so the knobs stay in one visible
/// place.
const TAPE_HEADER_TEMPLATE: &str = r#"# Generated - do not edit
Output {{ scene_video }}
Output {{ scene_text }}
Set Width {{ width }}
Set Height {{ height }}
Set Theme "{{ theme }}"
{% if font_family %}Set FontFamily "{{ font_family }}"
{% endif %}Set Framerate {{ framerate }}
Set Padding {{ padding }}
"#;

/// Seconds of crossfade between scenes in sequential playback.
const TRANSITION_SECS: f64 = 0.25;

pub fn run(ctx: &RunContext) -> std::io::Result<LaneResult> {
    let mut result = LaneResult {
        scenarios: Vec::new(),
        media: Vec::new(),
        failure: None,
        event_count: 0,
    };

    if let Err(e) = run_preinstall(ctx) {
        result.failure = Some(e);
        return Ok(result);
    }

    let scenes_dir = ctx.run.scenes_dir()?;
    let tapes_dir = ctx.run.tapes_dir()?;

    let mut scene_videos = Vec::new();
    for (index, scenario) in ctx.play.scenarios.iter().enumerate() {
        let started = Instant::now();
        let outcome = run_scene(ctx, scenario, index, &scenes_dir, &tapes_dir);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(video) => {
                scene_videos.push(video);
                result.scenarios.push(ScenarioOutcome {
                    label: scenario.label.clone(),
                    status: RunStatus::Success,
                    duration_ms,
                });
            }
            Err(failure) => {
                result.scenarios.push(ScenarioOutcome {
                    label: scenario.label.clone(),
                    status: RunStatus::Failed,
                    duration_ms,
                });
                write_scene_bundle(ctx, &failure);
                result.failure = Some(failure);
                return Ok(result);
            }
        }
    }

    match compose_media(ctx, &scene_videos) {
        Ok(media) => match super::export_media(ctx, &media) {
            Ok(exported) => result.media = exported,
            Err(e) => {
                result.failure = Some(StudioError::Internal {
                    id: "media-export".to_string(),
                    detail: e.to_string(),
                });
            }
        },
        Err(failure) => {
            write_scene_bundle(ctx, &failure);
            result.failure = Some(failure);
        }
    }

    Ok(result)
}

fn write_scene_bundle(ctx: &RunContext, failure: &StudioError) {
    let bundle = FailureBundle {
        reason: format!("{}\n{}", failure.kind(), failure.bundle_reason()),
        ..Default::default()
    };
    let _ = ctx.run.write_failure_bundle(&bundle, &ctx.redact);
}

/// Record one scenario: compile the tape, run the recorder, check the scene
/// artifact, and evaluate post-recording predicates.
fn run_scene(
    ctx: &RunContext,
    scenario: &Scenario,
    index: usize,
    scenes_dir: &Path,
    tapes_dir: &Path,
) -> Result<PathBuf, StudioError> {
    run_command_list(
        &scenario.setup,
        &std::env::current_dir().unwrap_or_else(|_| ctx.tmp_root.clone()),
        ctx.setup_timeout,
        &ctx.redact,
    )?;

    let scene_video = scenes_dir.join(format!("scene_{index}.mp4"));
    let scene_text = scenes_dir.join(format!("scene_{index}.txt"));
    let tape_path = tapes_dir.join(format!("scene_{index}.tape"));

    let tape = compile_tape(
        ctx.play,
        scenario,
        &scene_video,
        &scene_text,
        &ctx.redact,
        ctx.media_mode,
    )
    .map_err(|e| StudioError::Internal {
        id: "tape-compile".to_string(),
        detail: e.to_string(),
    })?;
    std::fs::write(&tape_path, &tape).map_err(|e| StudioError::Internal {
        id: "tape-write".to_string(),
        detail: e.to_string(),
    })?;

    let mut cmd = Command::new("vhs");
    cmd.arg(&tape_path);
    let output = shell_exec::run(&mut cmd, Some(&scenario.label)).map_err(|e| {
        StudioError::StepFailure {
            scenario: index,
            step: 0,
            reason: format!("recorder failed to start: {e}"),
        }
    })?;
    if !output.status.success() {
        return Err(StudioError::StepFailure {
            scenario: index,
            step: 0,
            reason: format!(
                "recorder exited with {}: {}",
                output.status,
                crate::utils::truncate_tail(&String::from_utf8_lossy(&output.stderr), 2048)
            ),
        });
    }

    // Any missing scene artifact fails the run
    if !scene_video.exists() {
        return Err(StudioError::StepFailure {
            scenario: index,
            step: 0,
            reason: format!("recorder produced no scene video at {}", scene_video.display()),
        });
    }

    evaluate_capture(scenario, index, &scene_text)?;

    Ok(scene_video)
}

/// Compile one scenario to a tape program.
fn compile_tape(
    play: &Screenplay,
    scenario: &Scenario,
    scene_video: &Path,
    scene_text: &Path,
    redact: &crate::redact::RedactionSet,
    media_mode: crate::redact::RedactMode,
) -> Result<String, minijinja::Error> {
    let env = Environment::new();
    let tmpl = env.template_from_str(TAPE_HEADER_TEMPLATE)?;
    let mut tape = tmpl.render(context! {
        scene_video => scene_video.display().to_string(),
        scene_text => scene_text.display().to_string(),
        width => play.settings.width,
        height => play.settings.height,
        theme => play.settings.theme,
        font_family => play.settings.font_family,
        framerate => play.settings.framerate,
        padding => play.settings.padding,
    })?;
    tape.push('\n');

    // Setup commands run inside the recording but hidden from it
    if !scenario.setup.is_empty() {
        tape.push_str("Hidden\n");
        for command in &scenario.setup {
            tape.push_str(&format!("Type `{}`\nEnter\n", escape_tape_text(command)));
        }
        tape.push_str("Show\n");
    }

    let mask_inputs = media_mode == crate::redact::RedactMode::InputLine;
    for action in &scenario.actions {
        // A masked input line is bracketed in Hidden/Show so the sensitive
        // value never enters the recording at all
        let sensitive = mask_inputs
            && match &action.kind {
                ActionKind::Command { text } | ActionKind::Input { text } => {
                    redact.is_sensitive(text)
                }
                _ => false,
            };
        if sensitive {
            tape.push_str("Hidden\n");
        }
        for line in directives_for(action) {
            tape.push_str(&line);
            tape.push('\n');
        }
        if sensitive {
            tape.push_str("Show\n");
        }
    }

    Ok(tape)
}

/// Action → recorder directives. Post-recording predicates (assertions)
/// compile to nothing here; they're checked against the text capture.
fn directives_for(action: &Action) -> Vec<String> {
    let timeout_suffix = action
        .timeout
        .map(|t| format!("@{}", String::from(t)))
        .unwrap_or_default();

    match &action.kind {
        ActionKind::Command { text } => vec![
            format!("Type `{}`", escape_tape_text(text)),
            "Enter".to_string(),
        ],
        ActionKind::Input { text } => vec![format!("Type `{}`", escape_tape_text(text))],
        ActionKind::Key { key } => vec![key.tape_token().to_string()],
        ActionKind::Hotkey { hotkey } => vec![hotkey.tape_token()],
        ActionKind::Sleep { duration } => vec![format!("Sleep {}", String::from(*duration))],
        // The recorder has no stability primitive; a fixed sleep of the
        // required quiet period is the deterministic equivalent
        ActionKind::WaitStable { duration } => {
            vec![format!("Sleep {}", String::from(*duration))]
        }
        ActionKind::WaitFor {
            target,
            mode,
            timeout,
        } => {
            let scope = match mode {
                WaitMode::Line => "+Line",
                // The recorder exposes no raw stream surface; the screen is
                // the closest superset of the default mode
                WaitMode::Default | WaitMode::Screen => "+Screen",
            };
            let timeout = timeout
                .map(|t| format!("@{}", String::from(t)))
                .unwrap_or(timeout_suffix);
            vec![format!("Wait{scope}{timeout} /{}/", escape_tape_regex(&regex::escape(target)))]
        }
        ActionKind::WaitScreenRegex { pattern } => {
            vec![format!("Wait+Screen{timeout_suffix} /{}/", escape_tape_regex(pattern))]
        }
        ActionKind::WaitLineRegex { pattern } => {
            vec![format!("Wait+Line{timeout_suffix} /{}/", escape_tape_regex(pattern))]
        }
        // Evaluated post-recording against the text capture
        ActionKind::AssertScreenRegex { .. } | ActionKind::AssertNotScreenRegex { .. } => vec![],
        // Rejected at validation; unreachable in a validated model
        ActionKind::ExpectExitCode { .. } => vec![],
    }
}

/// Evaluate regex assertions against the recorder's ASCII capture, in
/// declaration order.
fn evaluate_capture(
    scenario: &Scenario,
    index: usize,
    scene_text: &Path,
) -> Result<(), StudioError> {
    let needs_capture = scenario.actions.iter().any(|a| a.kind.is_assertion());
    if !needs_capture {
        return Ok(());
    }

    let capture = std::fs::read_to_string(scene_text).map_err(|e| StudioError::StepFailure {
        scenario: index,
        step: 0,
        reason: format!("recorder produced no text capture: {e}"),
    })?;
    let snap = Snapshot {
        screen: capture,
        stream_tail: String::new(),
        closed: true,
    };

    for (step, action) in scenario.actions.iter().enumerate() {
        let (pattern, negated) = match &action.kind {
            ActionKind::AssertScreenRegex { pattern } => (pattern, false),
            ActionKind::AssertNotScreenRegex { pattern } => (pattern, true),
            _ => continue,
        };
        let re = evaluator::compile_pattern(pattern).map_err(|e| StudioError::Internal {
            id: "assert-regex".to_string(),
            detail: e.to_string(),
        })?;
        if let Err(reason) = evaluator::check_assertion(&snap, &re, negated) {
            return Err(StudioError::StepFailure {
                scenario: index,
                step,
                reason,
            });
        }
    }
    Ok(())
}

/// Escape text for a backtick-quoted `Type` directive.
fn escape_tape_text(text: &str) -> String {
    text.replace('`', "\\`")
}

/// Escape a regex for the recorder's slash-delimited wait syntax.
fn escape_tape_regex(pattern: &str) -> String {
    pattern.replace('/', "\\/")
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Header-band labels: the text-draw filter when the compositor has it, a
/// pre-rendered image when an image renderer exists, nothing otherwise.
enum LabelOverlay {
    DrawText(String),
    Image(PathBuf),
    None,
}

/// Compose per-scene videos into the final media files.
fn compose_media(ctx: &RunContext, scenes: &[PathBuf]) -> Result<Vec<PathBuf>, StudioError> {
    if scenes.is_empty() {
        return Ok(Vec::new());
    }

    let media_dir = ctx.run.media_dir().map_err(internal("media-dir"))?;
    let composed_mp4 = media_dir.join(format!("{}.mp4", ctx.play.output));

    let labels: Vec<&str> = ctx.play.scenarios.iter().map(|s| s.label.as_str()).collect();
    let overlay = build_label_overlay(&labels, &ctx.play.settings, &media_dir);

    match ctx.playback {
        Playback::Sequential => compose_sequential(ctx, scenes, &composed_mp4, &overlay)?,
        Playback::Simultaneous => compose_simultaneous(ctx, scenes, &composed_mp4, &overlay)?,
    }

    let mut media = Vec::new();
    for format in &ctx.formats {
        match format {
            MediaFormat::Mp4 => media.push(composed_mp4.clone()),
            MediaFormat::Gif => {
                let gif = media_dir.join(format!("{}.gif", ctx.play.output));
                render_gif(&composed_mp4, &gif)?;
                media.push(gif);
            }
        }
    }

    Ok(media)
}

fn internal(id: &'static str) -> impl Fn(std::io::Error) -> StudioError {
    move |e| StudioError::Internal {
        id: id.to_string(),
        detail: e.to_string(),
    }
}

/// Append the label stage to a filter graph. Returns the final output pad
/// name. An image overlay consumes the extra input at index `image_input`.
fn apply_overlay(
    segments: &mut Vec<String>,
    last_pad: String,
    overlay: &LabelOverlay,
    image_input: usize,
) -> String {
    match overlay {
        LabelOverlay::DrawText(drawtext) => {
            segments.push(format!("[{last_pad}]{drawtext}[vout]"));
            "vout".to_string()
        }
        LabelOverlay::Image(_) => {
            segments.push(format!("[{last_pad}][{image_input}:v]overlay=0:0[vout]"));
            "vout".to_string()
        }
        LabelOverlay::None => last_pad,
    }
}

/// Concatenate scenes with a deterministic crossfade between them.
fn compose_sequential(
    ctx: &RunContext,
    scenes: &[PathBuf],
    out: &Path,
    overlay: &LabelOverlay,
) -> Result<(), StudioError> {
    if scenes.len() == 1 {
        return run_ffmpeg_single(&scenes[0], out, overlay);
    }

    let durations: Vec<f64> = scenes
        .iter()
        .map(|s| probe_duration(s))
        .collect::<Result<_, _>>()?;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y");
    for scene in scenes {
        cmd.arg("-i").arg(scene);
    }
    if let LabelOverlay::Image(image) = overlay {
        cmd.arg("-i").arg(image);
    }

    // Chain xfade pairwise: [0][1]xfade[x1]; [x1][2]xfade[x2]; ...
    let mut segments = Vec::new();
    let mut prev = "0:v".to_string();
    let mut offset = 0.0;
    for i in 1..scenes.len() {
        offset += durations[i - 1] - TRANSITION_SECS;
        let pad = format!("x{i}");
        segments.push(format!(
            "[{prev}][{i}:v]xfade=transition=fade:duration={TRANSITION_SECS}:offset={offset:.3}[{pad}]"
        ));
        prev = pad;
    }
    let final_pad = apply_overlay(&mut segments, prev, overlay, scenes.len());

    cmd.args(["-filter_complex", &segments.join(";")]);
    cmd.args(["-map", &format!("[{final_pad}]")]);
    cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-r"]);
    cmd.arg(ctx.play.settings.framerate.to_string());
    cmd.arg(out);

    run_compositor(cmd)
}

/// Side-by-side playback, every pane padded to the longest scene.
fn compose_simultaneous(
    ctx: &RunContext,
    scenes: &[PathBuf],
    out: &Path,
    overlay: &LabelOverlay,
) -> Result<(), StudioError> {
    if scenes.len() == 1 {
        return run_ffmpeg_single(&scenes[0], out, overlay);
    }

    let durations: Vec<f64> = scenes
        .iter()
        .map(|s| probe_duration(s))
        .collect::<Result<_, _>>()?;
    let longest = durations.iter().cloned().fold(0.0_f64, f64::max);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y");
    for scene in scenes {
        cmd.arg("-i").arg(scene);
    }
    if let LabelOverlay::Image(image) = overlay {
        cmd.arg("-i").arg(image);
    }

    let mut segments = Vec::new();
    let mut pads = Vec::new();
    for (i, duration) in durations.iter().enumerate() {
        let pad_secs = (longest - duration).max(0.0);
        let pad = format!("p{i}");
        segments.push(format!(
            "[{i}:v]tpad=stop_mode=clone:stop_duration={pad_secs:.3}[{pad}]"
        ));
        pads.push(format!("[{pad}]"));
    }
    segments.push(format!(
        "{}hstack=inputs={}[stacked]",
        pads.join(""),
        scenes.len()
    ));
    let final_pad = apply_overlay(&mut segments, "stacked".to_string(), overlay, scenes.len());

    cmd.args(["-filter_complex", &segments.join(";")]);
    cmd.args(["-map", &format!("[{final_pad}]")]);
    cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p"]);
    cmd.arg(out);

    run_compositor(cmd)
}

/// One-scene composition: re-encode (and label) without transitions.
fn run_ffmpeg_single(scene: &Path, out: &Path, overlay: &LabelOverlay) -> Result<(), StudioError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y").arg("-i").arg(scene);
    match overlay {
        LabelOverlay::DrawText(drawtext) => {
            cmd.args(["-vf", drawtext]);
        }
        LabelOverlay::Image(image) => {
            cmd.arg("-i").arg(image);
            cmd.args(["-filter_complex", "[0:v][1:v]overlay=0:0[vout]"]);
            cmd.args(["-map", "[vout]"]);
        }
        LabelOverlay::None => {}
    }
    cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p"]);
    cmd.arg(out);
    run_compositor(cmd)
}

/// GIF rendering through the palette pipeline.
fn render_gif(mp4: &Path, gif: &Path) -> Result<(), StudioError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y").arg("-i").arg(mp4);
    cmd.args([
        "-filter_complex",
        "[0:v]fps=15,split[a][b];[a]palettegen=stats_mode=diff[p];[b][p]paletteuse=dither=bayer",
    ]);
    cmd.arg(gif);
    run_compositor(cmd)
}

fn run_compositor(mut cmd: Command) -> Result<(), StudioError> {
    let output = shell_exec::run(&mut cmd, Some("compose")).map_err(|e| StudioError::Internal {
        id: "compositor-spawn".to_string(),
        detail: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(StudioError::StepFailure {
            scenario: 0,
            step: 0,
            reason: format!(
                "compositor exited with {}: {}",
                output.status,
                crate::utils::truncate_tail(&String::from_utf8_lossy(&output.stderr), 2048)
            ),
        });
    }
    Ok(())
}

/// Scene duration in seconds via the compositor's probe tool.
fn probe_duration(path: &Path) -> Result<f64, StudioError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]);
    cmd.arg(path);
    let output = shell_exec::run(&mut cmd, None).map_err(|e| StudioError::Internal {
        id: "ffprobe".to_string(),
        detail: e.to_string(),
    })?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim().parse::<f64>().map_err(|_| StudioError::Internal {
        id: "ffprobe-parse".to_string(),
        detail: format!("unparseable duration '{}' for {}", text.trim(), path.display()),
    })
}

/// Build the header-band label overlay, preferring the text-draw filter and
/// falling back to a pre-rendered image overlay. When neither capability is
/// available the band is omitted rather than rendered blank.
fn build_label_overlay(
    labels: &[&str],
    settings: &crate::screenplay::Settings,
    media_dir: &Path,
) -> LabelOverlay {
    if labels.is_empty() || labels.iter().all(|l| l.is_empty()) {
        return LabelOverlay::None;
    }
    let text = labels.join("  |  ");
    let band = (settings.height / 20).max(24);

    if compositor_has_drawtext() {
        let escaped = text
            .replace('\\', "\\\\")
            .replace(':', "\\:")
            .replace('\'', "\\\\'");
        return LabelOverlay::DrawText(format!(
            "drawtext=text='{escaped}':x=(w-text_w)/2:y={}:fontcolor=white:fontsize={}:box=1:boxcolor=black@0.6",
            band / 4,
            band / 2
        ));
    }

    if let Some(image) = render_label_image(&text, settings.width, band, media_dir) {
        return LabelOverlay::Image(image);
    }

    LabelOverlay::None
}

/// Probe the compositor once per invocation for the text-draw capability.
fn compositor_has_drawtext() -> bool {
    use once_cell::sync::OnceCell;
    static HAS_DRAWTEXT: OnceCell<bool> = OnceCell::new();
    *HAS_DRAWTEXT.get_or_init(|| {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-filters"]);
        match shell_exec::run(&mut cmd, None) {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains("drawtext"),
            Err(_) => false,
        }
    })
}

/// Image-overlay fallback: render the header band to a PNG with ImageMagick
/// when it is installed.
fn render_label_image(text: &str, width: u32, band: u32, media_dir: &Path) -> Option<PathBuf> {
    let magick = ["magick", "convert"]
        .into_iter()
        .find(|tool| which::which(tool).is_ok())?;
    let image = media_dir.join("labels.png");

    let mut cmd = Command::new(magick);
    cmd.args(["-size", &format!("{width}x{band}")]);
    cmd.args(["-background", "rgba(0,0,0,0.6)", "-fill", "white"]);
    cmd.args(["-gravity", "center", &format!("label:{text}")]);
    cmd.arg(&image);
    match shell_exec::run(&mut cmd, None) {
        Ok(output) if output.status.success() && image.exists() => Some(image),
        _ => None,
    }
}
