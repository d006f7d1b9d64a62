use super::*;

fn long_text() -> String {
    "Servidores ativos recebem o adicional conforme a tabela vigente. ".repeat(40)
}

fn decode(tokens: &[u32]) -> String {
    ENCODING
        .decode(tokens.to_vec())
        .expect("tokens should decode")
}

#[test]
fn tokens_decode_back_to_input() {
    let text = "Hello, world!  It's 2024\n\n{\"a\": \"ação\"}\t end";
    let tokens = tokenize(text);

    assert!(tokens.len() > 5);
    assert_eq!(decode(&tokens), text);
}

#[test]
fn known_token_count() {
    assert_eq!(count_tokens("hello world"), 2);
    assert_eq!(count_tokens(""), 0);
}

#[test]
fn tokenization_is_deterministic() {
    let text = long_text();
    assert_eq!(tokenize(&text), tokenize(&text));
    assert_eq!(count_tokens(&text), tokenize(&text).len());
}

#[test]
fn empty_text_yields_no_chunks() {
    let chunks = chunk_text("", 300, 50).expect("empty text is not an error");
    assert!(chunks.is_empty());
}

#[test]
fn short_text_is_single_chunk() {
    let text = r#"{"a": "hello world"}"#;
    let chunks = chunk_text(text, 300, 50).expect("chunking should succeed");

    assert_eq!(chunks, vec![text.to_string()]);
}

#[test]
fn text_of_exactly_max_tokens_is_single_chunk() {
    let text = "one two three four five";
    let max_tokens = count_tokens(text);

    let chunks = chunk_text(text, max_tokens, 2).expect("chunking should succeed");
    assert_eq!(chunks.len(), 1);
}

#[test]
fn overlap_not_smaller_than_window_is_rejected() {
    for (max_tokens, overlap) in [(10, 10), (10, 11), (0, 0), (1, 5)] {
        let result = chunk_text("some text to chunk", max_tokens, overlap);
        assert!(
            matches!(result, Err(RagError::InvalidConfiguration(_))),
            "({max_tokens}, {overlap}) should be rejected, got {result:?}"
        );
    }
}

#[test]
fn invalid_config_is_rejected_even_for_empty_text() {
    let result = chunk_text("", 5, 5);
    assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
}

#[test]
fn chunk_count_matches_window_formula() {
    let text = long_text();
    let n = count_tokens(&text);

    for (m, o) in [(300, 50), (50, 10), (17, 16), (7, 0), (1, 0)] {
        let config = ChunkingConfig {
            max_tokens: m,
            overlap: o,
        };
        let chunks = chunk_document(&text, &config).expect("chunking should succeed");
        let expected = if n <= m {
            1
        } else {
            (n - o).div_ceil(m - o)
        };
        assert_eq!(chunks.len(), expected, "m={m} o={o} n={n}");
    }
}

#[test]
fn windows_respect_bounds_and_start_at_zero() {
    let text = long_text();
    let config = ChunkingConfig {
        max_tokens: 40,
        overlap: 8,
    };

    let chunks = chunk_document(&text, &config).expect("chunking should succeed");

    assert!(chunks.len() > 1);
    assert_eq!(chunks[0].token_start, 0);
    assert!(text.starts_with(&chunks[0].text));
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert!(chunk.token_count <= config.max_tokens);
        assert_eq!(chunk.token_start, i * config.stride());
    }
    let last = chunks.last().expect("at least one chunk");
    assert!(text.ends_with(&last.text));
}

#[test]
fn every_chunk_is_its_token_window() {
    let text = long_text();
    let tokens = tokenize(&text);

    for (m, o) in [(40, 8), (25, 0), (12, 11)] {
        let config = ChunkingConfig {
            max_tokens: m,
            overlap: o,
        };
        let chunks = chunk_document(&text, &config).expect("chunking should succeed");

        for chunk in &chunks {
            let window = &tokens[chunk.token_start..chunk.token_start + chunk.token_count];
            assert_eq!(chunk.text, decode(window), "m={m} o={o}");
        }
        let last = chunks.last().expect("at least one chunk");
        assert_eq!(last.token_start + last.token_count, tokens.len());
    }
}

#[test]
fn long_single_character_runs_are_split() {
    let config = ChunkingConfig {
        max_tokens: 50,
        overlap: 10,
    };

    for text in ["!".repeat(3_000), "x".repeat(3_000), " \n".repeat(1_500)] {
        let chunks = chunk_document(&text, &config).expect("chunking should succeed");

        assert!(chunks.len() > 1, "a {} byte run stayed whole", text.len());
        for chunk in &chunks {
            assert!(chunk.token_count <= config.max_tokens);
            assert!(chunk.text.len() < text.len());
        }
    }
}

#[test]
fn window_edge_inside_a_character_does_not_fail() {
    let text = "🙂🎉 ação 漢字 ".repeat(30);
    let config = ChunkingConfig {
        max_tokens: 3,
        overlap: 1,
    };

    let chunks = chunk_document(&text, &config).expect("chunking should succeed");

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|chunk| !chunk.text.is_empty()));
}

#[test]
fn default_config() {
    let config = ChunkingConfig::default();
    assert_eq!(config.max_tokens, 300);
    assert_eq!(config.overlap, 50);
    assert_eq!(config.stride(), 250);
    assert!(config.validate().is_ok());
}
