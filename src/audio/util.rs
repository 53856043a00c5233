/// Picks the most suitable audio stream from the given input.
pub(crate) fn find_best_audio_stream(
    ctx: &ffmpeg_next::format::context::Input,
) -> Option<ffmpeg_next::format::stream::Stream<'_>> {
    ctx.streams().best(ffmpeg_next::util::media::Type::Audio)
}

// Converts a timestamp in seconds into time base units for quick comparison
// against packet PTS values.
pub(crate) fn seconds_to_timestamp(time_base: ffmpeg_next::Rational, seconds: f64) -> i64 {
    (seconds / f64::from(time_base)) as i64
}
