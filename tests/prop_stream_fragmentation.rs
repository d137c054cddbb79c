// Property: however the response stream is split into fragments, the parser
// yields the same parts as when fed the whole stream at once.

use bytes::Bytes;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;
use tts_chunk_cache::wire::encode_stream;
use tts_chunk_cache::{parse_stream, PhraseTiming, StreamParser, WireChunkMetadata};

const BOUNDARY: &str = "tts_chunk_boundary";

fn stream_strategy() -> impl Strategy<Value = Vec<(WireChunkMetadata, Bytes)>> {
    prop::collection::vec(
        ("[A-Za-z ,.]{0,40}", prop::collection::vec(any::<u8>(), 0..300), 0u32..5_000),
        1..6,
    )
    .prop_map(|chunks| {
        let mut start = 0.0;
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, (text, audio, duration))| {
                let mut meta = WireChunkMetadata::new(index, start);
                meta.phrases = vec![PhraseTiming::new(text.clone(), 0.0, f64::from(duration))];
                meta.text = text;
                start += f64::from(duration);
                (meta, Bytes::from(audio))
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_fragmentation_invariant(
        chunks in stream_strategy(),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12),
    ) {
        let stream = encode_stream(BOUNDARY, &chunks).unwrap();

        let mut whole = StreamParser::new(BOUNDARY);
        let expected = whole.push(&stream);
        prop_assert_eq!(expected.len(), chunks.len() * 2);

        let mut offsets: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
        offsets.sort_unstable();
        offsets.dedup();

        let mut fragments = Vec::new();
        let mut previous = 0;
        for offset in offsets.into_iter().chain(std::iter::once(stream.len())) {
            fragments.push(Ok::<Bytes, std::io::Error>(stream.slice(previous..offset)));
            previous = offset;
        }

        let parts = tokio_test::block_on(parse_stream(
            futures::stream::iter(fragments),
            BOUNDARY,
            &CancellationToken::new(),
        ))
        .unwrap();

        prop_assert_eq!(parts, expected);
    }
}
